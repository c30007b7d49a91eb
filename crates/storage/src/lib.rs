//! Persistent storage layer for provchain.
//!
//! This crate provides the storage backend for the ledger:
//! - Block storage (by hash and height) and the confirmed transaction index
//! - Merkle inclusion proofs
//! - The balance cache and the pending table
//! - Named locks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Ledger (provchain-chain)              │
//! └────────────────────────┬────────────────────────────────┘
//!                          │ PersistenceGateway / LockService
//! ┌────────────────────────▼────────────────────────────────┐
//! │                   Storage Layer                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │ StateManager│  │ ChainStore  │  │ Storage (DB)    │  │
//! │  │  - Balances │  │  - Blocks   │  │  - sled wrapper │  │
//! │  │  - Pending  │  │  - Txs      │  │  - batches      │  │
//! │  │             │  │  - Proofs   │  │  - key helpers  │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────┘  │
//! └────────────────────────┬────────────────────────────────┘
//!                          │
//! ┌────────────────────────▼────────────────────────────────┐
//! │                    sled Database                         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use provchain_core::{Block, Keypair};
//! use provchain_storage::{PersistenceGateway, Storage};
//! use rust_decimal::Decimal;
//!
//! let storage = Storage::open("./ledger_data").unwrap();
//! let owner = Keypair::generate().address();
//! let genesis = Block::genesis(owner, Decimal::from(1_000_000), 2).unwrap();
//! storage.insert_block(&genesis, &[]).unwrap();
//! assert_eq!(storage.query_balance(&owner).unwrap(), Decimal::from(1_000_000));
//! ```

pub mod chain;
pub mod db;
pub mod gateway;
pub mod lock;
pub mod state;

// Re-export commonly used types
pub use chain::{ChainStore, StoredProof};
pub use db::{BatchOp, Result, Storage, StorageError};
pub use gateway::PersistenceGateway;
pub use lock::{LocalLockService, LockService, SledLockService};
pub use state::StateManager;
