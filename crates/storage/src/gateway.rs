//! The persistence boundary the ledger writes through.

use crate::chain::{ChainStore, StoredProof};
use crate::db::{Result, Storage};
use crate::state::StateManager;
use provchain_core::{Address, Block, Hash, Transaction};
use rust_decimal::Decimal;

/// Everything the ledger persists or reads back.
///
/// `insert_block` is the only write that touches several tables at once and
/// must commit all of them or none. It returns `Ok` exactly when the write
/// set was applied.
pub trait PersistenceGateway: Send + Sync {
    /// Persist a sealed block with its transactions, proofs and balance
    /// changes, and drop its transactions from the pending table.
    fn insert_block(&self, block: &Block, proofs: &[StoredProof]) -> Result<()>;

    fn insert_transaction(&self, tx: &Transaction) -> Result<()>;

    fn insert_pending_transaction(&self, tx: &Transaction) -> Result<()>;

    fn delete_pending_transactions(&self, hashes: &[Hash]) -> Result<()>;

    fn delete_all_pending_transactions(&self) -> Result<()>;

    /// Pending transactions in submission order.
    fn load_pending_transactions(&self) -> Result<Vec<Transaction>>;

    fn load_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>>;

    fn load_block_by_height(&self, height: u64) -> Result<Option<Block>>;

    /// Every block, genesis first.
    fn load_chain(&self) -> Result<Vec<Block>>;

    fn load_transaction_by_hash(&self, hash: &Hash) -> Result<Option<Transaction>>;

    /// Every confirmed transaction in chain order.
    fn load_all_transactions(&self) -> Result<Vec<Transaction>>;

    /// Cached balance of an address.
    fn query_balance(&self, address: &Address) -> Result<Decimal>;

    fn cached_balances(&self) -> Result<Vec<(Address, Decimal)>>;

    fn insert_merkle_proof(&self, proof: &StoredProof) -> Result<()>;

    fn query_merkle_proof(&self, tx_hash: &Hash) -> Result<Option<StoredProof>>;

    /// Index of the head block, or None for an empty store.
    fn height(&self) -> Result<Option<u64>>;
}

impl PersistenceGateway for Storage {
    fn insert_block(&self, block: &Block, proofs: &[StoredProof]) -> Result<()> {
        let chain = ChainStore::new(self);
        let state = StateManager::new(self);

        let mut ops = chain.append_ops(block)?;
        for proof in proofs {
            ops.push(ChainStore::proof_op(proof)?);
        }
        ops.extend(state.balance_ops(block)?);

        let drained: Vec<Hash> = block
            .transactions
            .iter()
            .filter(|tx| !tx.is_reward())
            .map(|tx| tx.hash())
            .collect();
        ops.extend(StateManager::remove_pending_ops(&drained));

        tracing::debug!(
            index = block.index,
            hash = %block.hash,
            writes = ops.len(),
            "committing block"
        );
        self.batch(ops)?;
        // Committed once the batch applies; a failed flush only delays durability.
        if let Err(e) = self.flush() {
            tracing::warn!(index = block.index, error = %e, "flush after block commit failed");
        }
        Ok(())
    }

    fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        ChainStore::new(self).put_transaction(tx)
    }

    fn insert_pending_transaction(&self, tx: &Transaction) -> Result<()> {
        StateManager::new(self).put_pending(tx)
    }

    fn delete_pending_transactions(&self, hashes: &[Hash]) -> Result<()> {
        StateManager::new(self).delete_pending(hashes)
    }

    fn delete_all_pending_transactions(&self) -> Result<()> {
        StateManager::new(self).clear_pending()
    }

    fn load_pending_transactions(&self) -> Result<Vec<Transaction>> {
        StateManager::new(self).load_pending()
    }

    fn load_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>> {
        ChainStore::new(self).get_block_by_hash(hash)
    }

    fn load_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        ChainStore::new(self).get_block_by_height(height)
    }

    fn load_chain(&self) -> Result<Vec<Block>> {
        ChainStore::new(self).load_chain()
    }

    fn load_transaction_by_hash(&self, hash: &Hash) -> Result<Option<Transaction>> {
        ChainStore::new(self).get_transaction(hash)
    }

    fn load_all_transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self
            .load_chain()?
            .into_iter()
            .flat_map(|block| block.transactions)
            .collect())
    }

    fn query_balance(&self, address: &Address) -> Result<Decimal> {
        StateManager::new(self).get_balance(address)
    }

    fn cached_balances(&self) -> Result<Vec<(Address, Decimal)>> {
        StateManager::new(self).all_balances()
    }

    fn insert_merkle_proof(&self, proof: &StoredProof) -> Result<()> {
        ChainStore::new(self).put_proof(proof)
    }

    fn query_merkle_proof(&self, tx_hash: &Hash) -> Result<Option<StoredProof>> {
        ChainStore::new(self).get_proof(tx_hash)
    }

    fn height(&self) -> Result<Option<u64>> {
        ChainStore::new(self).get_height()
    }
}
