//! Integrity checks and provenance queries.

use super::{open_ledger, parse_hash, short};
use crate::keystore::FileKeyStore;
use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use provchain_storage::PersistenceGateway;
use std::path::PathBuf;

#[derive(Args)]
pub struct AuditArgs {
    #[command(subcommand)]
    command: AuditCommand,
}

#[derive(Subcommand)]
enum AuditCommand {
    /// Check block links, the balance cache and every transaction
    Validate {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },
    /// Follow an account's lineage pointers back to their root
    Lineage {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Wallet name or address (hex format)
        account: String,
    },
    /// Follow funds forward from a transaction
    Trace {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Transaction hash (hex format)
        tx_hash: String,

        /// Maximum number of hops to follow
        #[arg(long, default_value = "10")]
        hops: usize,
    },
    /// Verify a transaction's inclusion proof
    Proof {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Transaction hash (hex format)
        tx_hash: String,
    },
}

pub fn run(args: AuditArgs) -> Result<()> {
    match args.command {
        AuditCommand::Validate { data_dir } => validate(data_dir),
        AuditCommand::Lineage { data_dir, account } => lineage(data_dir, account),
        AuditCommand::Trace {
            data_dir,
            tx_hash,
            hops,
        } => trace(data_dir, tx_hash, hops),
        AuditCommand::Proof { data_dir, tx_hash } => proof(data_dir, tx_hash),
    }
}

fn validate(data_dir: PathBuf) -> Result<()> {
    let ledger = open_ledger(&data_dir)?;
    let stats = ledger.stats();

    println!();
    println!("{}", "Validating ledger...".bold().cyan());
    println!(
        "  Height {} · tip {} · {} pending",
        stats.height.to_string().bright_cyan(),
        short(&stats.tip_hash.to_hex()).bright_yellow(),
        stats.pending_transactions.to_string().bright_cyan()
    );
    println!();

    let mut failures = 0;

    if ledger.is_chain_valid() {
        println!("{}  Block hashes, links and merkle roots", "✓".green().bold());
    } else {
        failures += 1;
        println!("{}  Block hashes, links and merkle roots", "✗".red().bold());
    }

    match ledger.validate_database_state() {
        Ok(()) => println!("{}  Balance cache matches history", "✓".green().bold()),
        Err(e) => {
            failures += 1;
            println!("{}  Balance cache: {}", "✗".red().bold(), e);
        }
    }

    match ledger.audit_transactions() {
        Ok(()) => println!("{}  Signatures and funding", "✓".green().bold()),
        Err(e) => {
            failures += 1;
            println!("{}  Transactions: {}", "✗".red().bold(), e);
        }
    }

    if let Some(reason) = ledger.integrity_fault() {
        println!();
        println!("  {} {}", "Fault:".red().bold(), reason);
    }
    println!();

    if failures > 0 {
        bail!("{} integrity check(s) failed", failures);
    }
    println!("{}", "Ledger is consistent.".green().bold());
    Ok(())
}

fn lineage(data_dir: PathBuf, account: String) -> Result<()> {
    let address = FileKeyStore::new(&data_dir).resolve(&account)?;
    let ledger = open_ledger(&data_dir)?;
    let lineage = ledger.lineage_of(&address)?;

    println!();
    println!(
        "{} {}",
        "Lineage of".bold().cyan(),
        address.to_hex().bright_yellow()
    );
    println!();
    if lineage.is_empty() {
        println!("  {}", "No transactions.".yellow());
    }
    for (depth, tx) in lineage.iter().enumerate() {
        println!(
            "  {} {} {} → {} {}",
            format!("{:>3}.", depth).bright_black(),
            short(&tx.hash().to_hex()).bright_yellow(),
            tx.from.map_or_else(|| "reward".to_string(), |a| a.to_hex()).bright_black(),
            tx.to.to_hex().bright_black(),
            tx.amount.to_string().bright_cyan()
        );
    }
    println!();
    Ok(())
}

fn trace(data_dir: PathBuf, tx_hash: String, hops: usize) -> Result<()> {
    let hash = parse_hash(&tx_hash)?;
    let ledger = open_ledger(&data_dir)?;
    let path = ledger.trace_funds(&hash, hops)?;

    println!();
    println!("{}", "Fund trace:".bold().cyan());
    println!();
    for (step, hop) in path.iter().enumerate() {
        let status = if hop.block_hash.is_some() {
            "confirmed".bright_black()
        } else {
            "pending".yellow()
        };
        println!(
            "  {} {} {} → {} {} {}",
            format!("{:>3}.", step).bright_black(),
            short(&hop.tx_hash.to_hex()).bright_yellow(),
            hop.from.map_or_else(|| "reward".to_string(), |a| a.to_hex()).bright_black(),
            hop.to.to_hex().bright_black(),
            hop.amount.to_string().bright_cyan(),
            status
        );
    }
    println!();
    Ok(())
}

fn proof(data_dir: PathBuf, tx_hash: String) -> Result<()> {
    let hash = parse_hash(&tx_hash)?;
    let ledger = open_ledger(&data_dir)?;
    let included = ledger.verify_inclusion(&hash)?;

    println!();
    if let Some(stored) = ledger.store().query_merkle_proof(&hash)? {
        println!("  Block:  {}", stored.block_hash.to_hex().bright_yellow());
        println!("  Steps:  {}", stored.path.len().to_string().bright_cyan());
    }
    if included {
        println!("{}  Transaction is included in its block", "✓".green().bold());
        println!();
        Ok(())
    } else {
        println!("{}  Inclusion proof does not verify", "✗".red().bold());
        println!();
        bail!("inclusion proof for {} failed", hash)
    }
}
