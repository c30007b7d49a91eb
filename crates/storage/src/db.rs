//! sled database wrapper with serialization helpers.

use provchain_core::{Address, BlockError, Hash, TransactionError};
use sled::Db;
use std::path::Path;
use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Invalid genesis: {0}")]
    InvalidGenesis(String),

    #[error("Block out of order: {0}")]
    OutOfOrder(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<TransactionError> for StorageError {
    fn from(e: TransactionError) -> Self {
        StorageError::Corrupt(e.to_string())
    }
}

impl From<BlockError> for StorageError {
    fn from(e: BlockError) -> Self {
        StorageError::Corrupt(e.to_string())
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Wrapper around sled database with serialization helpers.
#[derive(Clone)]
pub struct Storage {
    db: Db,
}

impl Storage {
    /// Open a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open an in-memory database (for testing).
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Store a serializable value.
    pub fn put<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize,
    {
        let encoded = bincode::serialize(value)?;
        self.db.insert(key, encoded)?;
        Ok(())
    }

    /// Retrieve and deserialize a value.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: serde::de::DeserializeOwned,
    {
        match self.db.get(key)? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Deserialize every value stored under `prefix`, in key order.
    pub fn scan_prefix<V>(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, V)>>
    where
        V: serde::de::DeserializeOwned,
    {
        let mut values = Vec::new();
        for entry in self.db.scan_prefix(prefix) {
            let (key, bytes) = entry?;
            values.push((key.to_vec(), bincode::deserialize(&bytes)?));
        }
        Ok(values)
    }

    /// Get a fresh monotonically increasing id.
    pub fn next_id(&self) -> Result<u64> {
        Ok(self.db.generate_id()?)
    }

    /// Get the underlying sled database (for advanced operations like compare_and_swap).
    pub fn inner(&self) -> &Db {
        &self.db
    }

    /// Apply multiple operations atomically.
    ///
    /// Atomicity is provided by sled's `apply_batch`: either every operation
    /// becomes visible or none does.
    pub fn batch(&self, operations: Vec<BatchOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in operations {
            match op {
                BatchOp::Insert { key, value } => batch.insert(key, value),
                BatchOp::Remove { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Key Construction Helpers
    // =========================================================================

    /// Create a prefixed key for blocks by height.
    /// Format: "block:height:{height}"
    pub fn block_height_key(height: u64) -> Vec<u8> {
        format!("block:height:{}", height).into_bytes()
    }

    /// Create a prefixed key for blocks by hash.
    /// Format: "block:hash:" + hash_bytes
    pub fn block_hash_key(hash: &Hash) -> Vec<u8> {
        let mut key = b"block:hash:".to_vec();
        key.extend_from_slice(&hash.0);
        key
    }

    /// Create a prefixed key for confirmed transactions.
    /// Format: "tx:" + hash_bytes
    pub fn tx_key(hash: &Hash) -> Vec<u8> {
        let mut key = TX_PREFIX.to_vec();
        key.extend_from_slice(&hash.0);
        key
    }

    /// Create a prefixed key for pending transactions.
    /// Format: "pending:" + hash_bytes
    pub fn pending_key(hash: &Hash) -> Vec<u8> {
        let mut key = PENDING_PREFIX.to_vec();
        key.extend_from_slice(&hash.0);
        key
    }

    /// Create a prefixed key for merkle proofs.
    /// Format: "proof:" + tx_hash_bytes
    pub fn proof_key(tx_hash: &Hash) -> Vec<u8> {
        let mut key = b"proof:".to_vec();
        key.extend_from_slice(&tx_hash.0);
        key
    }

    /// Create a prefixed key for cached balances.
    /// Format: "balance:" + address_bytes
    pub fn balance_key(address: &Address) -> Vec<u8> {
        let mut key = BALANCE_PREFIX.to_vec();
        key.extend_from_slice(&address.0);
        key
    }

    /// Create a key for a named lock.
    /// Format: "lock:{name}"
    pub fn lock_key(name: &str) -> Vec<u8> {
        let mut key = LOCK_PREFIX.to_vec();
        key.extend_from_slice(name.as_bytes());
        key
    }
}

pub(crate) const TX_PREFIX: &[u8] = b"tx:";
pub(crate) const PENDING_PREFIX: &[u8] = b"pending:";
pub(crate) const BALANCE_PREFIX: &[u8] = b"balance:";
pub(crate) const LOCK_PREFIX: &[u8] = b"lock:";

/// Batch operation for atomic updates.
pub enum BatchOp {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

impl BatchOp {
    /// Serialize `value` into an insert operation.
    pub fn put<V: serde::Serialize>(key: Vec<u8>, value: &V) -> Result<Self> {
        Ok(BatchOp::Insert {
            key,
            value: bincode::serialize(value)?,
        })
    }

    pub fn remove(key: Vec<u8>) -> Self {
        BatchOp::Remove { key }
    }
}
