//! Transaction commands.

use super::{open_ledger, CliLedger};
use crate::keystore::FileKeyStore;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use provchain_chain::MiningOutcome;
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Args)]
pub struct TxArgs {
    #[command(subcommand)]
    command: TxCommand,
}

#[derive(Subcommand)]
enum TxCommand {
    /// Sign and submit a transfer
    Send {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Sender wallet name or address
        #[arg(short, long)]
        from: String,

        /// Recipient wallet name or address
        #[arg(short, long)]
        to: String,

        /// Amount to transfer
        #[arg(short, long)]
        amount: Decimal,

        /// Leave the transfer pending even when a block could be mined
        #[arg(long)]
        no_mine: bool,
    },
    /// List pending transactions
    Pending {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },
}

pub fn run(args: TxArgs) -> Result<()> {
    match args.command {
        TxCommand::Send {
            data_dir,
            from,
            to,
            amount,
            no_mine,
        } => send(data_dir, from, to, amount, no_mine),
        TxCommand::Pending { data_dir } => list_pending(data_dir),
    }
}

fn send(data_dir: PathBuf, from: String, to: String, amount: Decimal, no_mine: bool) -> Result<()> {
    let keys = FileKeyStore::new(&data_dir);
    let from = keys.resolve(&from)?;
    let to = keys.resolve(&to)?;
    let ledger = open_ledger(&data_dir)?;

    let tx = ledger
        .create_transaction(from, to, amount, &keys)
        .context("Failed to sign transaction")?;
    ledger
        .submit_transaction(tx.clone())
        .context("Transaction rejected")?;

    println!();
    println!("{}  Transaction submitted", "✓".green().bold());
    println!("    Hash:   {}", tx.hash().to_hex().bright_yellow());
    println!("    From:   {}", from.to_hex().bright_black());
    println!("    To:     {}", to.to_hex().bright_black());
    println!("    Amount: {}", amount.to_string().bright_cyan());

    if !no_mine {
        report_mining(&ledger)?;
    }
    println!();

    Ok(())
}

/// Mine whatever the pending queue allows and print the result.
pub(crate) fn report_mining(ledger: &CliLedger) -> Result<()> {
    match ledger.mine_pending_transactions()? {
        MiningOutcome::Idle => {
            println!(
                "    {} ({} of {} pending)",
                "Waiting for more transactions".bright_black(),
                ledger.pending_transactions().len(),
                ledger.config().transaction_threshold
            );
        }
        MiningOutcome::Sealed(blocks) => {
            for block in blocks {
                println!(
                    "{}  Mined block {} {}",
                    "✓".green().bold(),
                    format!("#{}", block.index).bright_cyan(),
                    block.hash.to_hex().bright_yellow()
                );
            }
        }
    }
    Ok(())
}

fn list_pending(data_dir: PathBuf) -> Result<()> {
    let ledger = open_ledger(&data_dir)?;
    let pending = ledger.pending_transactions();

    println!();
    println!("{}", "Pending Transactions:".bold().cyan());
    println!();
    if pending.is_empty() {
        println!("  {}", "None.".yellow());
    }
    for tx in &pending {
        println!(
            "  {} {} → {} {}",
            super::short(&tx.hash().to_hex()).bright_yellow(),
            tx.from.map_or_else(|| "reward".to_string(), |a| a.to_hex()).bright_black(),
            tx.to.to_hex().bright_black(),
            tx.amount.to_string().bright_cyan()
        );
    }
    println!();
    Ok(())
}
