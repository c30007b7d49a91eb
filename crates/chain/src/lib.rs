//! Ledger orchestration for provchain.
//!
//! This crate ties the core types and the persistence gateway together:
//! - **Ledger**: admission, block production and integrity checks
//! - **Mempool**: FIFO queue of pending transactions
//! - **Mining**: the named-lock guard and production phases
//! - **History**: lineage, fund tracing and inclusion proofs
//!
//! # Example
//!
//! ```rust,no_run
//! use provchain_chain::{Ledger, LedgerConfig};
//! use provchain_core::{KeyStore, MemoryKeyStore};
//! use provchain_storage::{LocalLockService, Storage};
//! use rust_decimal::Decimal;
//!
//! let keys = MemoryKeyStore::new();
//! let genesis = keys.generate_keypair().unwrap();
//! let config = LedgerConfig {
//!     genesis_address: Some(genesis),
//!     miner_address: Some(genesis),
//!     ..Default::default()
//! };
//!
//! let storage = Storage::open("./ledger_data").unwrap();
//! let ledger = Ledger::open(storage, LocalLockService::new(), config).unwrap();
//!
//! let to = keys.generate_keypair().unwrap();
//! let tx = ledger
//!     .create_transaction(genesis, to, Decimal::from(10), &keys)
//!     .unwrap();
//! ledger.submit_transaction(tx).unwrap();
//! ledger.mine_pending_transactions().unwrap();
//! ```

pub mod config;
pub mod history;
pub mod ledger;
pub mod mempool;
pub mod mining;

// Re-export commonly used types
pub use config::LedgerConfig;
pub use history::FundHop;
pub use ledger::{net_balances, validate_chain, Ledger, LedgerError, LedgerStats, Result};
pub use mempool::PendingQueue;
pub use mining::{MiningGuard, MiningOutcome, MiningPhase, MINING_LOCK};
