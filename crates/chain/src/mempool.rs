//! FIFO queue of admitted transactions waiting for a block.
//!
//! Transactions drained for sealing stay tracked as in-flight until the
//! block is committed, so lineage and balance checks never lose sight of
//! them, and a failed cycle can put them back at the front in order.

use parking_lot::Mutex;
use provchain_core::{Address, Hash, Transaction};
use rust_decimal::Decimal;
use std::collections::VecDeque;

#[derive(Default)]
struct QueueState {
    queued: VecDeque<Transaction>,
    in_flight: Vec<Transaction>,
}

impl QueueState {
    /// Oldest first: in-flight, then queued.
    fn iter(&self) -> impl DoubleEndedIterator<Item = &Transaction> {
        self.in_flight.iter().chain(self.queued.iter())
    }
}

/// Pending transaction queue.
#[derive(Default)]
pub struct PendingQueue {
    state: Mutex<QueueState>,
}

impl PendingQueue {
    /// Restore a queue from persisted pending transactions.
    pub fn from_transactions(transactions: Vec<Transaction>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queued: transactions.into(),
                in_flight: Vec::new(),
            }),
        }
    }

    /// Number of queued transactions (in-flight excluded).
    pub fn len(&self) -> usize {
        self.state.lock().queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a transaction is queued or in flight.
    pub fn contains(&self, tx_hash: &Hash) -> bool {
        self.state.lock().iter().any(|tx| tx.hash() == *tx_hash)
    }

    /// Find a queued or in-flight transaction by hash.
    pub fn get(&self, tx_hash: &Hash) -> Option<Transaction> {
        self.state
            .lock()
            .iter()
            .find(|tx| tx.hash() == *tx_hash)
            .cloned()
    }

    /// Append a transaction at the back of the queue.
    pub fn push(&self, tx: Transaction) {
        self.state.lock().queued.push_back(tx);
    }

    /// Move the first `count` transactions in flight, if that many are queued.
    pub fn take_batch(&self, count: usize) -> Option<Vec<Transaction>> {
        let mut state = self.state.lock();
        if state.queued.len() < count || !state.in_flight.is_empty() {
            return None;
        }
        let batch: Vec<Transaction> = state.queued.drain(..count).collect();
        state.in_flight = batch.clone();
        Some(batch)
    }

    /// Forget the in-flight batch once its block is committed.
    pub fn commit_batch(&self) {
        self.state.lock().in_flight.clear();
    }

    /// Put the in-flight batch back at the front, in its original order.
    pub fn restore_batch(&self) -> usize {
        let mut state = self.state.lock();
        let batch = std::mem::take(&mut state.in_flight);
        let restored = batch.len();
        for tx in batch.into_iter().rev() {
            state.queued.push_front(tx);
        }
        restored
    }

    /// Sum of amounts `address` sends in queued or in-flight transactions.
    pub fn debits_of(&self, address: &Address) -> Decimal {
        self.state
            .lock()
            .iter()
            .filter(|tx| tx.from.as_ref() == Some(address))
            .map(|tx| tx.amount)
            .sum()
    }

    /// Hash of the newest queued or in-flight transaction involving `address`.
    pub fn latest_involving(&self, address: &Address) -> Option<Hash> {
        self.state
            .lock()
            .iter()
            .rev()
            .find(|tx| tx.involves(address))
            .map(Transaction::hash)
    }

    /// In-flight then queued transactions, oldest first.
    pub fn all(&self) -> Vec<Transaction> {
        self.state.lock().iter().cloned().collect()
    }

    /// Snapshot of the queued transactions in order.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.state.lock().queued.iter().cloned().collect()
    }
}
