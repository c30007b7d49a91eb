//! Provenance queries over confirmed and pending transactions.

use crate::ledger::{Ledger, LedgerError, Result};
use provchain_core::{verify_proof, Address, Hash, Transaction};
use provchain_storage::{LockService, PersistenceGateway};
use rust_decimal::Decimal;
use std::collections::HashSet;

/// One movement of funds in a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundHop {
    pub tx_hash: Hash,
    pub from: Option<Address>,
    pub to: Address,
    pub amount: Decimal,
    /// Block the transfer was sealed into; `None` while pending.
    pub block_hash: Option<Hash>,
}

impl From<&Transaction> for FundHop {
    fn from(tx: &Transaction) -> Self {
        Self {
            tx_hash: tx.hash(),
            from: tx.from,
            to: tx.to,
            amount: tx.amount,
            block_hash: tx.block_hash,
        }
    }
}

impl<G: PersistenceGateway, L: LockService> Ledger<G, L> {
    /// Look up a transaction, pending first, then confirmed.
    pub fn find_transaction(&self, tx_hash: &Hash) -> Result<Option<Transaction>> {
        if let Some(tx) = self.pending().get(tx_hash) {
            return Ok(Some(tx));
        }
        Ok(self.store().load_transaction_by_hash(tx_hash)?)
    }

    /// Every confirmed transaction in chain order followed by the in-flight
    /// batch and the pending queue.
    fn full_history(&self) -> Result<Vec<Transaction>> {
        // Read the queue first so a block committed in between is not missed.
        let unconfirmed = self.pending().all();
        let mut history = self.store().load_all_transactions()?;
        let confirmed: HashSet<Hash> = history.iter().map(Transaction::hash).collect();
        history.extend(
            unconfirmed
                .into_iter()
                .filter(|tx| !confirmed.contains(&tx.hash())),
        );
        Ok(history)
    }

    /// Transactions involving `address`, oldest first, pending last.
    pub fn transactions_for(&self, address: &Address) -> Result<Vec<Transaction>> {
        Ok(self
            .full_history()?
            .into_iter()
            .filter(|tx| tx.involves(address))
            .collect())
    }

    /// Follow origin pointers from the newest transaction involving `address`
    /// back to the transaction that started its lineage. Newest first.
    pub fn lineage_of(&self, address: &Address) -> Result<Vec<Transaction>> {
        let mut lineage = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.expected_origin(address);

        while let Some(hash) = cursor {
            if !seen.insert(hash) {
                return Err(LedgerError::ChainIntegrity(format!(
                    "lineage of {address} loops back to {hash}"
                )));
            }
            let tx = self
                .find_transaction(&hash)?
                .ok_or_else(|| LedgerError::NotFound(format!("transaction {hash}")))?;
            cursor = tx.origin_tx_hash;
            lineage.push(tx);
        }
        Ok(lineage)
    }

    /// Follow funds forward from `tx_hash`: each hop is the first later
    /// transfer sent by the previous hop's recipient.
    ///
    /// The starting transaction is the first hop. At most `max_hops` hops
    /// are returned.
    pub fn trace_funds(&self, tx_hash: &Hash, max_hops: usize) -> Result<Vec<FundHop>> {
        let history = self.full_history()?;
        let mut position = history
            .iter()
            .position(|tx| tx.hash() == *tx_hash)
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {tx_hash}")))?;

        let mut hops = Vec::new();
        while hops.len() < max_hops {
            let current = &history[position];
            hops.push(FundHop::from(current));

            let recipient = current.to;
            match history[position + 1..]
                .iter()
                .position(|tx| tx.from == Some(recipient))
            {
                Some(offset) => position += offset + 1,
                None => break,
            }
        }
        Ok(hops)
    }

    /// Check a confirmed transaction's stored inclusion proof against the
    /// merkle root of its block.
    pub fn verify_inclusion(&self, tx_hash: &Hash) -> Result<bool> {
        let proof = self
            .store()
            .query_merkle_proof(tx_hash)?
            .ok_or_else(|| LedgerError::NotFound(format!("inclusion proof for {tx_hash}")))?;
        let block = self
            .store()
            .load_block_by_hash(&proof.block_hash)?
            .ok_or_else(|| LedgerError::NotFound(format!("block {}", proof.block_hash)))?;

        let included = block.transactions.iter().any(|tx| tx.hash() == *tx_hash)
            && verify_proof(tx_hash, &proof.path, &block.merkle_root);
        if !included {
            tracing::warn!(tx = %tx_hash, block = %block.hash, "inclusion proof does not verify");
        }
        Ok(included)
    }
}
