//! Core ledger primitives for provchain.
//!
//! This crate provides the fundamental types used throughout the ledger:
//! - Cryptographic primitives (hashing, signing, addresses)
//! - Key management
//! - Transactions
//! - Blocks and proof of work
//! - Merkle trees and inclusion proofs

pub mod block;
pub mod crypto;
pub mod hash;
pub mod keystore;
pub mod merkle;
pub mod transaction;

// Re-export commonly used types at the crate root
pub use block::{current_timestamp, Block, BlockError, BlockParts};
pub use crypto::{Address, CryptoError, Keypair, PublicKey, Signature};
pub use hash::{hash, hash_concat, Hash, H256};
pub use keystore::{KeyStore, MemoryKeyStore};
pub use merkle::{merkle_root, verify_proof, MerkleError, MerkleTree, ProofStep};
pub use transaction::{Transaction, TransactionError, TransactionParts, TransactionSignature};
