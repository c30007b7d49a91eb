//! Mutable ledger state: the balance cache and the pending table.

use crate::db::{BatchOp, Result, Storage, StorageError, BALANCE_PREFIX, PENDING_PREFIX};
use provchain_core::{crypto::AddressBytes, Address, Block, Hash, Transaction, TransactionParts};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Manages the cached balances and the persisted pending queue.
pub struct StateManager<'a> {
    storage: &'a Storage,
}

impl<'a> StateManager<'a> {
    /// Create a new StateManager wrapping the given storage.
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    // =========================================================================
    // Balance Cache
    // =========================================================================

    /// Get the cached balance, zero if the address was never touched.
    pub fn get_balance(&self, address: &Address) -> Result<Decimal> {
        let key = Storage::balance_key(address);
        Ok(self.storage.get::<_, Decimal>(key)?.unwrap_or_default())
    }

    /// Overwrite a cached balance.
    pub fn set_balance(&self, address: &Address, balance: Decimal) -> Result<()> {
        self.storage.put(Storage::balance_key(address), &balance)
    }

    /// All cached balances, ordered by address.
    pub fn all_balances(&self) -> Result<Vec<(Address, Decimal)>> {
        let entries: Vec<(Vec<u8>, Decimal)> = self.storage.scan_prefix(BALANCE_PREFIX)?;
        entries
            .into_iter()
            .map(|(key, balance)| -> Result<(Address, Decimal)> {
                let bytes: AddressBytes = key[BALANCE_PREFIX.len()..]
                    .try_into()
                    .map_err(|_| StorageError::Corrupt("malformed balance key".into()))?;
                Ok((Address(bytes), balance))
            })
            .collect()
    }

    /// Build the cache updates that apply `block`'s credits and debits.
    pub fn balance_ops(&self, block: &Block) -> Result<Vec<BatchOp>> {
        let mut updated: BTreeMap<Address, Decimal> = BTreeMap::new();
        for tx in &block.transactions {
            if let Some(from) = tx.from {
                let balance = match updated.get(&from) {
                    Some(b) => *b,
                    None => self.get_balance(&from)?,
                };
                updated.insert(from, balance - tx.amount);
            }
            let balance = match updated.get(&tx.to) {
                Some(b) => *b,
                None => self.get_balance(&tx.to)?,
            };
            updated.insert(tx.to, balance + tx.amount);
        }

        updated
            .iter()
            .map(|(address, balance)| BatchOp::put(Storage::balance_key(address), balance))
            .collect()
    }

    // =========================================================================
    // Pending Table
    // =========================================================================

    /// Persist a pending transaction behind everything already queued.
    pub fn put_pending(&self, tx: &Transaction) -> Result<()> {
        let seq = self.storage.next_id()?;
        self.storage.put(Storage::pending_key(&tx.hash()), &(seq, tx))
    }

    /// Load pending transactions in submission order.
    pub fn load_pending(&self) -> Result<Vec<Transaction>> {
        let entries: Vec<(Vec<u8>, (u64, TransactionParts))> =
            self.storage.scan_prefix(PENDING_PREFIX)?;
        let mut queued: Vec<(u64, TransactionParts)> =
            entries.into_iter().map(|(_, entry)| entry).collect();
        queued.sort_by_key(|(seq, _)| *seq);

        queued
            .into_iter()
            .map(|(_, parts)| -> Result<Transaction> { Ok(Transaction::from_parts(parts)?) })
            .collect()
    }

    /// Removal operations for the given pending entries.
    pub fn remove_pending_ops(hashes: &[Hash]) -> Vec<BatchOp> {
        hashes
            .iter()
            .map(|hash| BatchOp::remove(Storage::pending_key(hash)))
            .collect()
    }

    /// Remove the given pending entries atomically.
    pub fn delete_pending(&self, hashes: &[Hash]) -> Result<()> {
        self.storage.batch(Self::remove_pending_ops(hashes))
    }

    /// Drop the whole pending table.
    pub fn clear_pending(&self) -> Result<()> {
        let mut ops = Vec::new();
        for entry in self.storage.inner().scan_prefix(PENDING_PREFIX) {
            let (key, _) = entry?;
            ops.push(BatchOp::remove(key.to_vec()));
        }
        self.storage.batch(ops)
    }
}
