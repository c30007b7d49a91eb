//! Account management command.

use super::open_ledger;
use crate::keystore::FileKeyStore;
use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

#[derive(Args)]
pub struct AccountArgs {
    #[command(subcommand)]
    command: AccountCommand,
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Generate a new wallet
    New {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Name for the wallet file
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List all wallets with their balances
    List {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },
    /// Check account balance
    Balance {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Wallet name or address (hex format)
        account: String,
    },
    /// Show every transaction involving an account
    History {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Wallet name or address (hex format)
        account: String,
    },
}

pub fn run(args: AccountArgs) -> Result<()> {
    match args.command {
        AccountCommand::New { data_dir, name } => new_wallet(data_dir, name),
        AccountCommand::List { data_dir } => list_wallets(data_dir),
        AccountCommand::Balance { data_dir, account } => check_balance(data_dir, account),
        AccountCommand::History { data_dir, account } => show_history(data_dir, account),
    }
}

fn new_wallet(data_dir: PathBuf, name: Option<String>) -> Result<()> {
    let keys = FileKeyStore::new(&data_dir);
    let (name, address) = keys.create(name.as_deref())?;

    println!("{}", "Generated new wallet:".bold().cyan());
    println!();
    println!("  Name:    {}", name.bright_white());
    println!("  Address: {}", address.to_hex().bright_yellow());
    println!();
    println!(
        "{}  Saved to: {}",
        "✓".green().bold(),
        data_dir
            .join("keys")
            .join(format!("{}.json", name))
            .display()
            .to_string()
            .bright_black()
    );
    println!();
    println!("{}", "Keep your private key safe!".yellow().bold());

    Ok(())
}

fn list_wallets(data_dir: PathBuf) -> Result<()> {
    let wallets = FileKeyStore::new(&data_dir).wallets()?;
    if wallets.is_empty() {
        println!("{}", "No wallets found.".yellow());
        println!(
            "Use {} to create a new wallet.",
            "provchain account new".bright_cyan()
        );
        return Ok(());
    }

    let ledger = open_ledger(&data_dir)?;

    println!("{}", "Wallets:".bold().cyan());
    println!();
    for (name, address) in wallets {
        let balance = ledger.get_balance_of_address(&address)?;
        println!(
            "  {} {} {}",
            format!("{}:", name).bright_black(),
            address.to_hex().bright_yellow(),
            balance.to_string().bright_cyan()
        );
    }
    println!();
    Ok(())
}

fn check_balance(data_dir: PathBuf, account: String) -> Result<()> {
    let address = FileKeyStore::new(&data_dir).resolve(&account)?;
    let ledger = open_ledger(&data_dir)?;
    let balance = ledger.get_balance_of_address(&address)?;
    let pending = ledger
        .pending_transactions()
        .iter()
        .filter(|tx| tx.from == Some(address))
        .count();

    println!();
    println!("  Address: {}", address.to_hex().bright_yellow());
    println!("  Balance: {}", balance.to_string().bright_cyan());
    if pending > 0 {
        println!(
            "  Pending: {}",
            format!("{} outgoing", pending).bright_black()
        );
    }
    println!();

    Ok(())
}

fn show_history(data_dir: PathBuf, account: String) -> Result<()> {
    let address = FileKeyStore::new(&data_dir).resolve(&account)?;
    let ledger = open_ledger(&data_dir)?;
    let history = ledger.transactions_for(&address)?;

    println!();
    println!(
        "{} {}",
        "History of".bold().cyan(),
        address.to_hex().bright_yellow()
    );
    println!();

    if history.is_empty() {
        println!("  {}", "No transactions.".yellow());
    }
    for tx in &history {
        let direction = if tx.to == address {
            format!("+{}", tx.amount).green()
        } else {
            format!("-{}", tx.amount).red()
        };
        let counterparty = if tx.to == address {
            tx.from.map_or_else(|| "reward".to_string(), |from| from.to_hex())
        } else {
            tx.to.to_hex()
        };
        let status = if tx.block_hash.is_some() {
            "confirmed".bright_black()
        } else {
            "pending".yellow()
        };
        println!(
            "  {} {:>14} {} {}",
            super::short(&tx.hash().to_hex()).bright_yellow(),
            direction,
            counterparty.bright_black(),
            status
        );
    }
    println!();

    Ok(())
}
