//! CLI commands module.

use anyhow::{Context, Result};
use clap::Subcommand;
use provchain_chain::{Ledger, LedgerConfig};
use provchain_core::Hash;
use provchain_storage::{SledLockService, Storage};
use std::fs;
use std::path::Path;

mod account;
mod audit;
mod block;
mod init;
mod tx;

/// Ledger as opened by the CLI, with its mining lock kept in the database.
pub type CliLedger = Ledger<Storage, SledLockService>;

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new ledger
    Init(init::InitArgs),
    /// Wallet management and balances
    Account(account::AccountArgs),
    /// Transaction operations
    Tx(tx::TxArgs),
    /// Block operations
    Block(block::BlockArgs),
    /// Integrity checks and provenance queries
    Audit(audit::AuditArgs),
}

pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init(args) => init::run(args),
        Commands::Account(args) => account::run(args),
        Commands::Tx(args) => tx::run(args),
        Commands::Block(args) => block::run(args),
        Commands::Audit(args) => audit::run(args),
    }
}

fn config_path(data_dir: &Path) -> std::path::PathBuf {
    data_dir.join("config.json")
}

pub(crate) fn load_config(data_dir: &Path) -> Result<LedgerConfig> {
    let contents = fs::read_to_string(config_path(data_dir))
        .context("Failed to read config.json. Did you run 'provchain init'?")?;
    serde_json::from_str(&contents).context("Malformed config.json")
}

pub(crate) fn save_config(data_dir: &Path, config: &LedgerConfig) -> Result<()> {
    let path = config_path(data_dir);
    fs::write(&path, serde_json::to_string_pretty(config)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Open the ledger stored in `data_dir` with its saved configuration.
pub(crate) fn open_ledger(data_dir: &Path) -> Result<CliLedger> {
    let config = load_config(data_dir)?;
    let storage = Storage::open(data_dir.join("db"))
        .context("Failed to open storage. Did you run 'provchain init'?")?;
    let locks = SledLockService::new(&storage).context("Failed to open lock table")?;
    Ledger::open(storage, locks, config).context("Failed to open ledger")
}

pub(crate) fn parse_hash(s: &str) -> Result<Hash> {
    Hash::from_hex(s)
        .with_context(|| format!("Invalid hash: {}", s))
}

/// Shorten a hex string for list output.
pub(crate) fn short(hex: &str) -> &str {
    &hex[..hex.len().min(16)]
}
