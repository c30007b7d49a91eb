//! Block operations command.

use super::{open_ledger, parse_hash, short};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use provchain_core::Block;
use provchain_storage::PersistenceGateway;
use std::path::PathBuf;

#[derive(Args)]
pub struct BlockArgs {
    #[command(subcommand)]
    command: BlockCommand,
}

#[derive(Subcommand)]
enum BlockCommand {
    /// Mine pending transactions into blocks
    Mine {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },
    /// List recent blocks
    List {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Number of blocks to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },
    /// Show detailed block information
    Info {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Block index or hash (hex format)
        block_id: String,
    },
}

pub fn run(args: BlockArgs) -> Result<()> {
    match args.command {
        BlockCommand::Mine { data_dir } => mine(data_dir),
        BlockCommand::List { data_dir, count } => list_blocks(data_dir, count),
        BlockCommand::Info { data_dir, block_id } => show_block_info(data_dir, block_id),
    }
}

fn mine(data_dir: PathBuf) -> Result<()> {
    let ledger = open_ledger(&data_dir)?;
    println!();
    super::tx::report_mining(&ledger)?;
    println!();
    Ok(())
}

fn list_blocks(data_dir: PathBuf, count: usize) -> Result<()> {
    let ledger = open_ledger(&data_dir)?;
    let chain = ledger.chain();

    println!();
    println!("{}", "Recent Blocks:".bold().cyan());
    println!();

    for block in chain.iter().rev().take(count) {
        println!(
            "  {} {} {}",
            format!("#{}", block.index).bright_black(),
            short(&block.hash.to_hex()).bright_yellow(),
            format!("({} txs)", block.tx_count()).bright_black()
        );
    }

    println!();
    Ok(())
}

fn show_block_info(data_dir: PathBuf, block_id: String) -> Result<()> {
    let ledger = open_ledger(&data_dir)?;

    // Try parsing as index first, then as hash
    let block: Block = if let Ok(index) = block_id.parse::<u64>() {
        ledger.block_at(index).context("Block not found")?
    } else {
        let hash = parse_hash(&block_id)?;
        ledger
            .store()
            .load_block_by_hash(&hash)?
            .context("Block not found")?
    };

    println!();
    println!("{}", format!("Block #{}", block.index).bold().cyan());
    println!();
    println!("  Hash:          {}", block.hash.to_hex().bright_yellow());
    println!("  Previous Hash: {}", block.previous_hash.to_hex().bright_black());
    println!("  Merkle Root:   {}", block.merkle_root.to_hex().bright_black());
    println!(
        "  Lineage Tip:   {}",
        block
            .origin_tx_hash
            .map_or_else(|| "none".to_string(), |h| h.to_hex())
            .bright_black()
    );
    println!("  Timestamp:     {}", format_timestamp(block.timestamp).bright_white());
    println!("  Difficulty:    {}", block.difficulty.to_string().bright_cyan());
    println!("  Nonce:         {}", block.nonce.to_string().bright_cyan());
    println!();
    println!(
        "{}",
        format!("Transactions ({}):", block.tx_count()).bold()
    );
    for tx in &block.transactions {
        println!(
            "  {} {} → {} {}",
            short(&tx.hash().to_hex()).bright_yellow(),
            tx.from.map_or_else(|| "reward".to_string(), |a| a.to_hex()).bright_black(),
            tx.to.to_hex().bright_black(),
            tx.amount.to_string().bright_cyan()
        );
    }
    println!();

    Ok(())
}

fn format_timestamp(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map_or_else(|| millis.to_string(), |t| t.to_rfc3339())
}
