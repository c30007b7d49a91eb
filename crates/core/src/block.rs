//! Blocks, proof of work and in-block validation.

use crate::crypto::{Address, Signature};
use crate::hash::{hash_concat, Hash};
use crate::merkle::{merkle_root, MerkleError, MerkleTree};
use crate::transaction::{Transaction, TransactionError, TransactionParts, TransactionSignature};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// How many nonces are tried between two checks of the cancellation flag.
pub const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Errors raised while assembling, mining or loading a block.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("mining was cancelled")]
    MiningCancelled,

    #[error("merkle error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("block hash mismatch (stored {stored}, computed {computed})")]
    HashMismatch { stored: Hash, computed: Hash },

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

pub type Result<T> = std::result::Result<T, BlockError>;

/// Current time in milliseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// A sealed (or candidate) block of transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BlockParts", into = "BlockParts")]
pub struct Block {
    /// Position in the chain (0 for genesis).
    pub index: u64,
    /// Hash of the previous block.
    pub previous_hash: Hash,
    /// Creation time in milliseconds.
    pub timestamp: u64,
    /// Transactions in insertion order.
    pub transactions: Vec<Transaction>,
    /// Leading zero hex characters required of `hash`.
    pub difficulty: u32,
    /// Merkle root over the transaction hashes.
    pub merkle_root: Hash,
    pub nonce: u64,
    /// Lineage summary taken from the block's last transactions.
    pub origin_tx_hash: Option<Hash>,
    pub hash: Hash,
}

/// Raw field set of a block, as read back from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockParts {
    pub index: u64,
    pub previous_hash: Hash,
    pub timestamp: u64,
    pub transactions: Vec<TransactionParts>,
    pub difficulty: u32,
    pub merkle_root: Hash,
    pub nonce: u64,
    pub origin_tx_hash: Option<Hash>,
    pub hash: Hash,
}

/// Transaction fields committed to by the block hash (everything but `block_hash`).
#[derive(Serialize)]
struct CommittedTransaction<'a> {
    from: Option<&'a Address>,
    to: &'a Address,
    amount: &'a Decimal,
    timestamp: u64,
    signature: Option<CommittedSignature<'a>>,
    origin_tx_hash: Option<&'a Hash>,
    hash: Hash,
}

#[derive(Serialize)]
struct CommittedSignature<'a> {
    public_key: &'a [u8; 32],
    signature: &'a Signature,
}

impl<'a> From<&'a Transaction> for CommittedTransaction<'a> {
    fn from(tx: &'a Transaction) -> Self {
        Self {
            from: tx.from.as_ref(),
            to: &tx.to,
            amount: &tx.amount,
            timestamp: tx.timestamp,
            signature: tx.signature.as_ref().map(|s: &TransactionSignature| CommittedSignature {
                public_key: &s.public_key.0,
                signature: &s.signature,
            }),
            origin_tx_hash: tx.origin_tx_hash.as_ref(),
            hash: tx.hash(),
        }
    }
}

impl Block {
    /// Build a candidate block with its derived fields filled in and `nonce = 0`.
    pub fn assemble(
        index: u64,
        previous_hash: Hash,
        transactions: Vec<Transaction>,
        difficulty: u32,
    ) -> Result<Self> {
        let mut block = Self {
            index,
            previous_hash,
            timestamp: current_timestamp(),
            transactions,
            difficulty,
            merkle_root: Hash::ZERO,
            nonce: 0,
            origin_tx_hash: None,
            hash: Hash::ZERO,
        };
        block.merkle_root = block.calculate_merkle_root()?;
        block.origin_tx_hash = block.calculate_last_origin_transaction_hash();
        block.hash = block.calculate_hash();
        Ok(block)
    }

    /// Create and mine the genesis block, issuing `issuance` to `genesis_address`.
    pub fn genesis(genesis_address: Address, issuance: Decimal, difficulty: u32) -> Result<Self> {
        let issue = Transaction::reward(genesis_address, issuance);
        let mut block = Self::assemble(0, Hash::ZERO, vec![issue], difficulty)?;
        block.mine_block(difficulty)?;
        Ok(block)
    }

    /// Rebuild a block from stored fields.
    ///
    /// Every transaction goes through [`Transaction::from_parts`], and the
    /// stored block hash must match the recomputed one.
    pub fn from_stored(parts: BlockParts) -> Result<Self> {
        let transactions = parts
            .transactions
            .into_iter()
            .map(Transaction::from_parts)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let block = Self {
            index: parts.index,
            previous_hash: parts.previous_hash,
            timestamp: parts.timestamp,
            transactions,
            difficulty: parts.difficulty,
            merkle_root: parts.merkle_root,
            nonce: parts.nonce,
            origin_tx_hash: parts.origin_tx_hash,
            hash: parts.hash,
        };
        let computed = block.calculate_hash();
        if computed != block.hash {
            return Err(BlockError::HashMismatch {
                stored: block.hash,
                computed,
            });
        }
        Ok(block)
    }

    fn transaction_hashes(&self) -> Vec<Hash> {
        self.transactions.iter().map(|tx| tx.hash()).collect()
    }

    /// Merkle root over the transaction hashes (zero hash when empty).
    pub fn calculate_merkle_root(&self) -> std::result::Result<Hash, MerkleError> {
        merkle_root(&self.transaction_hashes())
    }

    /// Lineage summary: the last transaction's origin, or else the second-to-last's.
    pub fn calculate_last_origin_transaction_hash(&self) -> Option<Hash> {
        let mut recent = self.transactions.iter().rev();
        let last = recent.next()?;
        last.origin_tx_hash
            .or_else(|| recent.next().and_then(|tx| tx.origin_tx_hash))
    }

    fn encode_transactions(&self) -> Vec<u8> {
        let committed: Vec<CommittedTransaction<'_>> =
            self.transactions.iter().map(CommittedTransaction::from).collect();
        bincode::serialize(&committed).expect("serialization should not fail")
    }

    fn digest_with(&self, nonce: u64, encoded_transactions: &[u8]) -> Hash {
        let origin = self.origin_tx_hash.unwrap_or(Hash::ZERO);
        hash_concat(&[
            self.previous_hash.as_ref(),
            &self.timestamp.to_le_bytes(),
            self.merkle_root.as_ref(),
            &nonce.to_le_bytes(),
            &[u8::from(self.origin_tx_hash.is_some())],
            origin.as_ref(),
            encoded_transactions,
        ])
    }

    /// Recompute the block hash from its current fields.
    pub fn calculate_hash(&self) -> Hash {
        self.digest_with(self.nonce, &self.encode_transactions())
    }

    /// Search nonces until the hash meets `difficulty`, then embed the transactions.
    pub fn mine_block(&mut self, difficulty: u32) -> Result<()> {
        self.search_nonce(difficulty, None)
    }

    /// Like [`Block::mine_block`], giving up when `cancel` is raised.
    ///
    /// A cancelled block is left unsealed with `nonce = 0`.
    pub fn mine_block_cancellable(&mut self, difficulty: u32, cancel: &AtomicBool) -> Result<()> {
        self.search_nonce(difficulty, Some(cancel))
    }

    fn search_nonce(&mut self, difficulty: u32, cancel: Option<&AtomicBool>) -> Result<()> {
        self.difficulty = difficulty;
        let encoded = self.encode_transactions();

        let mut nonce = 0u64;
        let mut candidate = self.digest_with(nonce, &encoded);
        while !candidate.meets_difficulty(difficulty) {
            nonce = nonce.wrapping_add(1);
            if nonce % CANCEL_CHECK_INTERVAL == 0
                && cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
            {
                self.nonce = 0;
                self.hash = self.digest_with(0, &encoded);
                return Err(BlockError::MiningCancelled);
            }
            candidate = self.digest_with(nonce, &encoded);
        }

        self.nonce = nonce;
        self.hash = candidate;
        for tx in &mut self.transactions {
            tx.embed(candidate)?;
        }
        Ok(())
    }

    /// Check every transaction's integrity, signature and funding.
    ///
    /// `prior_balance` reports an address's balance before this block. Debits
    /// made earlier in the same block are subtracted before each check.
    pub fn has_valid_transactions<F>(&self, prior_balance: F) -> bool
    where
        F: Fn(&Address) -> Decimal,
    {
        let mut spent: HashMap<Address, Decimal> = HashMap::new();

        for tx in &self.transactions {
            if let Err(e) = tx.verify_transaction() {
                tracing::warn!(block = self.index, tx = %tx.hash(), error = %e, "tampered transaction");
                return false;
            }
            match tx.is_valid() {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(block = self.index, tx = %tx.hash(), "signature does not verify");
                    return false;
                }
                Err(e) => {
                    tracing::warn!(block = self.index, tx = %tx.hash(), error = %e, "malformed signature");
                    return false;
                }
            }

            let Some(sender) = tx.from else {
                continue;
            };
            let already = spent.entry(sender).or_insert(Decimal::ZERO);
            let available = prior_balance(&sender) - *already;
            if available < tx.amount {
                tracing::warn!(
                    block = self.index,
                    tx = %tx.hash(),
                    sender = %sender,
                    %available,
                    amount = %tx.amount,
                    "insufficient funds"
                );
                return false;
            }
            *already += tx.amount;
        }
        true
    }

    /// Check the merkle root matches the transactions.
    pub fn verify_merkle_root(&self) -> bool {
        self.calculate_merkle_root()
            .is_ok_and(|root| root == self.merkle_root)
    }

    /// Check the stored lineage summary matches the transactions.
    pub fn verify_lineage(&self) -> bool {
        self.origin_tx_hash == self.calculate_last_origin_transaction_hash()
    }

    /// Check the stored hash satisfies the block's difficulty.
    pub fn meets_difficulty(&self) -> bool {
        self.hash.meets_difficulty(self.difficulty)
    }

    /// Check if this is the genesis block.
    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == Hash::ZERO
    }

    /// Build the merkle tree over this block's transactions.
    pub fn merkle_tree(&self) -> std::result::Result<MerkleTree, MerkleError> {
        MerkleTree::build(&self.transaction_hashes())
    }

    /// Get the number of transactions in this block.
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}

impl TryFrom<BlockParts> for Block {
    type Error = BlockError;

    fn try_from(parts: BlockParts) -> Result<Self> {
        Self::from_stored(parts)
    }
}

impl From<Block> for BlockParts {
    fn from(block: Block) -> Self {
        Self {
            index: block.index,
            previous_hash: block.previous_hash,
            timestamp: block.timestamp,
            transactions: block.transactions.into_iter().map(Into::into).collect(),
            difficulty: block.difficulty,
            merkle_root: block.merkle_root,
            nonce: block.nonce,
            origin_tx_hash: block.origin_tx_hash,
            hash: block.hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash;
    use crate::keystore::{KeyStore, MemoryKeyStore};

    fn transfer(keys: &MemoryKeyStore, from: Address, to: Address, amount: i64, origin: Option<Hash>) -> Transaction {
        Transaction::new(from, to, Decimal::from(amount), origin)
            .signed(keys)
            .unwrap()
    }

    #[test]
    fn test_genesis_block() {
        let keys = MemoryKeyStore::new();
        let g = keys.generate_keypair().unwrap();
        let genesis = Block::genesis(g, Decimal::from(1_000_000), 1).unwrap();

        assert!(genesis.is_genesis());
        assert_eq!(genesis.tx_count(), 1);
        assert!(genesis.transactions[0].is_reward());
        assert_eq!(genesis.transactions[0].to, g);
        assert_eq!(genesis.transactions[0].block_hash, Some(genesis.hash));
        assert!(genesis.meets_difficulty());
        assert_eq!(genesis.hash, genesis.calculate_hash());
    }

    #[test]
    fn test_assemble_fills_derived_fields() {
        let keys = MemoryKeyStore::new();
        let a = keys.generate_keypair().unwrap();
        let b = keys.generate_keypair().unwrap();
        let tx = transfer(&keys, a, b, 5, Some(hash(b"prev")));

        let block = Block::assemble(1, hash(b"parent"), vec![tx.clone()], 2).unwrap();
        assert_eq!(block.nonce, 0);
        assert!(block.verify_merkle_root());
        assert_eq!(block.origin_tx_hash, Some(hash(b"prev")));
        assert_eq!(block.hash, block.calculate_hash());
        assert_eq!(block.merkle_tree().unwrap().root_hash(), block.merkle_root);
    }

    #[test]
    fn test_empty_block_merkle_root() {
        let block = Block::assemble(1, Hash::ZERO, vec![], 0).unwrap();
        assert_eq!(block.merkle_root, Hash::ZERO);
        assert!(block.verify_merkle_root());
        assert_eq!(block.origin_tx_hash, None);
    }

    #[test]
    fn test_last_origin_falls_back_to_second_to_last() {
        let keys = MemoryKeyStore::new();
        let a = keys.generate_keypair().unwrap();
        let b = keys.generate_keypair().unwrap();
        let m = keys.generate_keypair().unwrap();
        let origin = hash(b"origin");

        let spend = transfer(&keys, a, b, 1, Some(origin));
        let reward = Transaction::reward(m, Decimal::from(100));
        let block = Block::assemble(1, Hash::ZERO, vec![spend, reward.clone()], 0).unwrap();
        assert_eq!(block.calculate_last_origin_transaction_hash(), Some(origin));

        let only_reward = Block::assemble(1, Hash::ZERO, vec![reward], 0).unwrap();
        assert_eq!(only_reward.calculate_last_origin_transaction_hash(), None);
    }

    #[test]
    fn test_mine_block_meets_difficulty() {
        for difficulty in 0..=2 {
            let mut block = Block::assemble(1, hash(b"parent"), vec![], 0).unwrap();
            block.mine_block(difficulty).unwrap();
            assert!(block.hash.meets_difficulty(difficulty));
            assert_eq!(block.hash, block.calculate_hash());
            if difficulty == 0 {
                assert_eq!(block.nonce, 0);
            }
        }
    }

    #[test]
    fn test_mining_cancelled() {
        let mut block = Block::assemble(1, Hash::ZERO, vec![], 0).unwrap();
        let cancel = AtomicBool::new(true);

        // 64 zero hex characters is never reached, so only the flag stops the search.
        let result = block.mine_block_cancellable(64, &cancel);
        assert!(matches!(result, Err(BlockError::MiningCancelled)));
        assert_eq!(block.nonce, 0);
        assert_eq!(block.hash, block.calculate_hash());
    }

    #[test]
    fn test_block_hash_ignores_embedding() {
        let keys = MemoryKeyStore::new();
        let a = keys.generate_keypair().unwrap();
        let b = keys.generate_keypair().unwrap();

        let mut block =
            Block::assemble(1, Hash::ZERO, vec![transfer(&keys, a, b, 1, None)], 1).unwrap();
        block.mine_block(1).unwrap();
        assert!(block.transactions.iter().all(|tx| tx.block_hash == Some(block.hash)));
        assert_eq!(block.hash, block.calculate_hash());
    }

    #[test]
    fn test_field_mutation_changes_hash() {
        let keys = MemoryKeyStore::new();
        let a = keys.generate_keypair().unwrap();
        let b = keys.generate_keypair().unwrap();
        let mut block =
            Block::assemble(1, Hash::ZERO, vec![transfer(&keys, a, b, 1, None)], 1).unwrap();
        block.mine_block(1).unwrap();

        let mut tampered = block.clone();
        tampered.timestamp += 1;
        assert_ne!(tampered.calculate_hash(), block.hash);

        let mut tampered = block.clone();
        tampered.transactions[0].amount = Decimal::from(2);
        assert_ne!(tampered.calculate_hash(), block.hash);

        let mut tampered = block.clone();
        tampered.origin_tx_hash = Some(hash(b"forged"));
        assert_ne!(tampered.calculate_hash(), block.hash);
    }

    #[test]
    fn test_from_stored_rejects_tampering() {
        let keys = MemoryKeyStore::new();
        let g = keys.generate_keypair().unwrap();
        let genesis = Block::genesis(g, Decimal::from(10), 1).unwrap();

        let bytes = bincode::serialize(&genesis).unwrap();
        let decoded: Block = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, genesis);

        let mut parts = BlockParts::from(genesis.clone());
        parts.nonce += 1;
        assert!(matches!(
            Block::from_stored(parts),
            Err(BlockError::HashMismatch { .. })
        ));

        let mut parts = BlockParts::from(genesis);
        parts.transactions[0].amount = Decimal::from(11);
        assert!(matches!(
            Block::from_stored(parts),
            Err(BlockError::Transaction(TransactionError::HashMismatch { .. }))
        ));
    }

    #[test]
    fn test_has_valid_transactions() {
        let keys = MemoryKeyStore::new();
        let a = keys.generate_keypair().unwrap();
        let b = keys.generate_keypair().unwrap();

        let t1 = transfer(&keys, a, b, 6, None);
        let t2 = transfer(&keys, a, b, 4, Some(t1.hash()));
        let block = Block::assemble(1, Hash::ZERO, vec![t1, t2], 0).unwrap();

        assert!(block.has_valid_transactions(|_| Decimal::from(10)));
        // The second spend overdraws once the first is counted.
        assert!(!block.has_valid_transactions(|_| Decimal::from(9)));
    }

    #[test]
    fn test_has_valid_transactions_rejects_tampering() {
        let keys = MemoryKeyStore::new();
        let a = keys.generate_keypair().unwrap();
        let b = keys.generate_keypair().unwrap();

        let mut block =
            Block::assemble(1, Hash::ZERO, vec![transfer(&keys, a, b, 1, None)], 0).unwrap();
        block.transactions[0].amount = Decimal::from(2);
        assert!(!block.has_valid_transactions(|_| Decimal::from(100)));

        let unsigned = Transaction::new(a, b, Decimal::from(1), None);
        let block = Block::assemble(1, Hash::ZERO, vec![unsigned], 0).unwrap();
        assert!(!block.has_valid_transactions(|_| Decimal::from(100)));
    }
}
