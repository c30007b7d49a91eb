//! Initialize ledger command.

use super::{open_ledger, save_config};
use crate::keystore::FileKeyStore;
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use provchain_chain::LedgerConfig;
use rust_decimal::Decimal;
use std::fs;
use std::path::PathBuf;

#[derive(Args)]
pub struct InitArgs {
    /// Directory to store ledger data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Pending transactions per block
    #[arg(short, long, default_value = "2")]
    threshold: usize,

    /// Reward paid to the miner per block
    #[arg(short, long, default_value = "100")]
    reward: Decimal,

    /// Leading zero hex characters required of block hashes
    #[arg(long, default_value = "2")]
    difficulty: u32,

    /// Amount issued to the genesis wallet
    #[arg(long, default_value = "1000000")]
    issuance: Decimal,

    /// Milliseconds to wait for the mining lock
    #[arg(long, default_value = "0")]
    lock_timeout_ms: u64,

    /// Pay no mining rewards
    #[arg(long)]
    no_reward: bool,
}

pub fn run(args: InitArgs) -> Result<()> {
    println!("{}", "Initializing provchain...".bold().cyan());
    println!();

    if args.data_dir.join("config.json").exists() {
        bail!(
            "A ledger already exists in {}",
            args.data_dir.display()
        );
    }

    fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", args.data_dir))?;
    println!("{}  Created data directory", "✓".green().bold());

    let keys = FileKeyStore::new(&args.data_dir);
    let (_, genesis) = keys.create(Some("genesis"))?;
    println!("  Genesis wallet: {}", genesis.to_hex().bright_yellow());

    let miner = if args.no_reward {
        None
    } else {
        let (_, miner) = keys.create(Some("miner"))?;
        println!("  Miner wallet:   {}", miner.to_hex().bright_yellow());
        Some(miner)
    };

    let config = LedgerConfig {
        transaction_threshold: args.threshold,
        mining_reward: args.reward,
        difficulty: args.difficulty,
        genesis_issuance: args.issuance,
        lock_timeout_ms: args.lock_timeout_ms,
        miner_address: miner,
        genesis_address: Some(genesis),
    };
    config.validate()?;
    save_config(&args.data_dir, &config)?;
    println!(
        "{}  Saved config to: {}",
        "✓".green().bold(),
        args.data_dir.join("config.json").display().to_string().bright_black()
    );

    let ledger = open_ledger(&args.data_dir)?;
    let genesis_block = ledger
        .latest_block()
        .context("Ledger has no genesis block")?;

    println!();
    println!("{}  Created genesis block", "✓".green().bold());
    println!("    Hash:     {}", genesis_block.hash.to_hex().bright_yellow());
    println!("    Nonce:    {}", genesis_block.nonce.to_string().bright_cyan());
    println!("    Issuance: {}", args.issuance.to_string().bright_cyan());

    println!();
    println!("{}", "Ledger initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!(
        "  • Use {} to create wallets",
        "provchain account new".bright_cyan()
    );
    println!(
        "  • Use {} to send transactions",
        "provchain tx send".bright_cyan()
    );
    println!(
        "  • Use {} to check integrity",
        "provchain audit validate".bright_cyan()
    );

    Ok(())
}
