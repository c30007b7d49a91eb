//! Block, transaction and proof storage.

use crate::db::{BatchOp, Result, Storage, StorageError};
use provchain_core::{Block, BlockParts, Hash, ProofStep, Transaction, TransactionParts};
use serde::{Deserialize, Serialize};

/// Keys for chain metadata.
const CHAIN_HEAD_KEY: &[u8] = b"chain:head";
const CHAIN_HEIGHT_KEY: &[u8] = b"chain:height";

/// A merkle inclusion proof persisted next to its block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProof {
    pub block_hash: Hash,
    pub tx_hash: Hash,
    /// Sibling digests ordered from leaf to root.
    pub path: Vec<ProofStep>,
}

/// Manages block storage and chain state.
pub struct ChainStore<'a> {
    storage: &'a Storage,
}

impl<'a> ChainStore<'a> {
    /// Create a new ChainStore wrapping the given storage.
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    // =========================================================================
    // Block Storage
    // =========================================================================

    /// Build the write set that appends `block` to the chain.
    ///
    /// The block must extend the current head: index 0 on an empty store,
    /// otherwise `height + 1` with `previous_hash` equal to the head hash.
    /// Each transaction is indexed under `tx:` as part of the same set.
    pub fn append_ops(&self, block: &Block) -> Result<Vec<BatchOp>> {
        match (self.get_head()?, self.get_height()?) {
            (None, _) => {
                if !block.is_genesis() {
                    return Err(StorageError::InvalidGenesis(format!(
                        "first block must be genesis, got index {}",
                        block.index
                    )));
                }
            }
            (Some(head), Some(height)) => {
                if block.index == 0 {
                    return Err(StorageError::InvalidGenesis(
                        "Chain already initialized".into(),
                    ));
                }
                if block.index != height + 1 {
                    return Err(StorageError::OutOfOrder(format!(
                        "expected block height {}, got {}",
                        height + 1,
                        block.index
                    )));
                }
                if block.previous_hash != head {
                    return Err(StorageError::OutOfOrder(format!(
                        "block previous_hash {} doesn't match chain head {}",
                        block.previous_hash, head
                    )));
                }
            }
            (Some(_), None) => {
                return Err(StorageError::Corrupt("chain head without height".into()));
            }
        }

        let mut ops = vec![
            BatchOp::put(Storage::block_hash_key(&block.hash), block)?,
            BatchOp::put(Storage::block_height_key(block.index), &block.hash)?,
            BatchOp::put(CHAIN_HEAD_KEY.to_vec(), &block.hash)?,
            BatchOp::put(CHAIN_HEIGHT_KEY.to_vec(), &block.index)?,
        ];
        for tx in &block.transactions {
            ops.push(BatchOp::put(Storage::tx_key(&tx.hash()), tx)?);
        }
        Ok(ops)
    }

    /// Get a block by its hash.
    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>> {
        let key = Storage::block_hash_key(hash);
        match self.storage.get::<_, BlockParts>(key)? {
            Some(parts) => Ok(Some(Block::from_stored(parts)?)),
            None => Ok(None),
        }
    }

    /// Get a block by its height.
    ///
    /// This performs two lookups:
    /// 1. height → hash (secondary index)
    /// 2. hash → block (primary storage)
    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        let height_key = Storage::block_height_key(height);
        let hash: Option<Hash> = self.storage.get(&height_key)?;

        match hash {
            Some(h) => self.get_block_by_hash(&h),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Chain Head Tracking
    // =========================================================================

    /// Get the current chain head hash.
    pub fn get_head(&self) -> Result<Option<Hash>> {
        self.storage.get(CHAIN_HEAD_KEY)
    }

    /// Get the height of the head block, or None for an empty store.
    pub fn get_height(&self) -> Result<Option<u64>> {
        self.storage.get::<_, u64>(CHAIN_HEIGHT_KEY)
    }

    // =========================================================================
    // Chain Operations
    // =========================================================================

    /// Get blocks in a range [from_height, to_height].
    pub fn get_blocks_range(&self, from_height: u64, to_height: u64) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for height in from_height..=to_height {
            match self.get_block_by_height(height)? {
                Some(block) => blocks.push(block),
                None => {
                    return Err(StorageError::NotFound(format!("block at height {height}")));
                }
            }
        }
        Ok(blocks)
    }

    /// Load the whole chain, genesis first.
    pub fn load_chain(&self) -> Result<Vec<Block>> {
        match self.get_height()? {
            Some(height) => self.get_blocks_range(0, height),
            None => Ok(Vec::new()),
        }
    }

    // =========================================================================
    // Transactions and Proofs
    // =========================================================================

    /// Index a confirmed transaction by hash.
    pub fn put_transaction(&self, tx: &Transaction) -> Result<()> {
        self.storage.put(Storage::tx_key(&tx.hash()), tx)
    }

    /// Look up a confirmed transaction by hash.
    pub fn get_transaction(&self, hash: &Hash) -> Result<Option<Transaction>> {
        match self.storage.get::<_, TransactionParts>(Storage::tx_key(hash))? {
            Some(parts) => Ok(Some(Transaction::from_parts(parts)?)),
            None => Ok(None),
        }
    }

    pub fn proof_op(proof: &StoredProof) -> Result<BatchOp> {
        BatchOp::put(Storage::proof_key(&proof.tx_hash), proof)
    }

    /// Store a merkle proof keyed by transaction hash.
    pub fn put_proof(&self, proof: &StoredProof) -> Result<()> {
        self.storage.put(Storage::proof_key(&proof.tx_hash), proof)
    }

    /// Load the merkle proof for a transaction.
    pub fn get_proof(&self, tx_hash: &Hash) -> Result<Option<StoredProof>> {
        self.storage.get(Storage::proof_key(tx_hash))
    }
}
