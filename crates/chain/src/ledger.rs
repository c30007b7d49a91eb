//! The ledger: admission, block production and integrity checks.
//!
//! Block production runs through `Idle → Mining → Sealing → Appended`. The
//! whole drain-build-seal-persist sequence runs under the named `"mining"`
//! lock, held by a [`MiningGuard`]. Any failure after the drain puts the
//! drained transactions back at the front of the queue and drops the reward.

use crate::config::LedgerConfig;
use crate::mempool::PendingQueue;
use crate::mining::{MiningGuard, MiningOutcome, MiningPhase, MINING_LOCK};
use parking_lot::{Mutex, RwLock};
use provchain_core::{
    Address, Block, BlockError, Hash, KeyStore, MerkleError, Transaction, TransactionError,
};
use provchain_storage::{LockService, PersistenceGateway, StorageError, StoredProof};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("hash mismatch (stored {stored}, computed {computed})")]
    HashMismatch { stored: Hash, computed: Hash },

    #[error("insufficient funds: {address} has {available}, needs {required}")]
    InsufficientFunds {
        address: Address,
        required: Decimal,
        available: Decimal,
    },

    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("chain integrity violated: {0}")]
    ChainIntegrity(String),

    #[error("merkle error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("mining was cancelled")]
    MiningCancelled,

    #[error("signing error: {0}")]
    Signing(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<TransactionError> for LedgerError {
    fn from(e: TransactionError) -> Self {
        match e {
            TransactionError::Signing(msg) => LedgerError::Signing(msg),
            TransactionError::Signature(msg) => LedgerError::Signature(msg),
            TransactionError::HashMismatch { stored, computed } => {
                LedgerError::HashMismatch { stored, computed }
            }
            other @ (TransactionError::InvalidAmount(_) | TransactionError::AlreadyEmbedded(_)) => {
                LedgerError::Validation(other.to_string())
            }
        }
    }
}

impl From<BlockError> for LedgerError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::MiningCancelled => LedgerError::MiningCancelled,
            BlockError::Merkle(e) => LedgerError::Merkle(e),
            BlockError::HashMismatch { stored, computed } => {
                LedgerError::HashMismatch { stored, computed }
            }
            BlockError::Transaction(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Check a block's hash, merkle root and lineage summary against its contents.
fn check_contents(block: &Block) -> std::result::Result<(), String> {
    if block.hash != block.calculate_hash() {
        return Err(format!("block {} hash does not match its contents", block.index));
    }
    if !block.verify_merkle_root() {
        return Err(format!("block {} merkle root mismatch", block.index));
    }
    if !block.verify_lineage() {
        return Err(format!("block {} lineage summary mismatch", block.index));
    }
    Ok(())
}

/// Check the structural links of a chain.
///
/// The first block must be a genesis block holding a single issuance. Every
/// block must hash to its stored hash and carry the merkle root and lineage
/// summary of its own transactions. Every later block must point at its
/// predecessor.
pub fn validate_chain(blocks: &[Block]) -> std::result::Result<(), String> {
    let Some(first) = blocks.first() else {
        return Err("chain is empty".into());
    };
    if !first.is_genesis() {
        return Err(format!("block 0 is not a genesis block ({})", first.hash));
    }
    if first.tx_count() != 1 || !first.transactions[0].is_reward() {
        return Err("genesis block must hold exactly one issuance".into());
    }
    check_contents(first)?;

    for pair in blocks.windows(2) {
        let (prior, block) = (&pair[0], &pair[1]);
        check_contents(block)?;
        if block.previous_hash != prior.hash {
            return Err(format!("block {} does not link to block {}", block.index, prior.index));
        }
    }
    Ok(())
}

/// Net balance of every address touched by `transactions`.
pub fn net_balances<'a, I>(transactions: I) -> HashMap<Address, Decimal>
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let mut balances: HashMap<Address, Decimal> = HashMap::new();
    for tx in transactions {
        apply(&mut balances, tx);
    }
    balances
}

fn apply(balances: &mut HashMap<Address, Decimal>, tx: &Transaction) {
    if let Some(from) = tx.from {
        *balances.entry(from).or_default() -= tx.amount;
    }
    *balances.entry(tx.to).or_default() += tx.amount;
}

/// A single-node ledger over a persistence gateway and a lock service.
pub struct Ledger<G: PersistenceGateway, L: LockService> {
    store: G,
    locks: L,
    config: LedgerConfig,
    chain: RwLock<Vec<Block>>,
    pending: PendingQueue,
    /// Serializes admission against the commit of a sealed block.
    admission: Mutex<()>,
    cancel: AtomicBool,
    phase: Mutex<MiningPhase>,
    fault: Mutex<Option<String>>,
}

impl<G: PersistenceGateway, L: LockService> Ledger<G, L> {
    /// Open the ledger stored in `store`, creating the genesis block on an empty store.
    pub fn open(store: G, locks: L, config: LedgerConfig) -> Result<Self> {
        config.validate()?;

        let mut chain = store.load_chain()?;
        if chain.is_empty() {
            let genesis_address = config.genesis_address.ok_or_else(|| {
                LedgerError::Validation("a genesis address is required to initialize".into())
            })?;
            let genesis =
                Block::genesis(genesis_address, config.genesis_issuance, config.difficulty)?;
            store.insert_block(&genesis, &proofs_for(&genesis)?)?;
            info!(
                hash = %genesis.hash,
                address = %genesis_address,
                issuance = %config.genesis_issuance,
                "genesis block created"
            );
            chain.push(genesis);
        }

        let pending = store.load_pending_transactions()?;
        info!(
            height = chain.len() - 1,
            pending = pending.len(),
            "ledger opened"
        );

        Ok(Self {
            store,
            locks,
            config,
            chain: RwLock::new(chain),
            pending: PendingQueue::from_transactions(pending),
            admission: Mutex::new(()),
            cancel: AtomicBool::new(false),
            phase: Mutex::new(MiningPhase::Idle),
            fault: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &G {
        &self.store
    }

    pub(crate) fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    /// Snapshot of the chain, genesis first.
    pub fn chain(&self) -> Vec<Block> {
        self.chain.read().clone()
    }

    /// Number of blocks, genesis included.
    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }

    pub fn block_at(&self, index: u64) -> Option<Block> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.chain.read().get(i).cloned())
    }

    pub fn latest_block(&self) -> Option<Block> {
        self.chain.read().last().cloned()
    }

    /// Snapshot of the pending queue in FIFO order.
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pending.snapshot()
    }

    pub fn phase(&self) -> MiningPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: MiningPhase) {
        *self.phase.lock() = phase;
        debug!(?phase, "mining phase");
    }

    // =========================================================================
    // Integrity Latch
    // =========================================================================

    fn ensure_no_fault(&self) -> Result<()> {
        match self.fault.lock().as_ref() {
            Some(reason) => Err(LedgerError::ChainIntegrity(format!(
                "ledger halted until acknowledged: {reason}"
            ))),
            None => Ok(()),
        }
    }

    fn latch_fault(&self, reason: &str) {
        warn!(reason, "integrity fault latched");
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(reason.to_string());
        }
    }

    /// The latched integrity fault, if any.
    pub fn integrity_fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Clear the latched fault, returning it.
    pub fn acknowledge_integrity_fault(&self) -> Option<String> {
        let cleared = self.fault.lock().take();
        if let Some(reason) = &cleared {
            info!(reason = reason.as_str(), "integrity fault acknowledged");
        }
        cleared
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Hash the next transaction from `address` must name as its origin.
    pub fn expected_origin(&self, address: &Address) -> Option<Hash> {
        self.pending.latest_involving(address).or_else(|| {
            self.chain
                .read()
                .iter()
                .rev()
                .flat_map(|block| block.transactions.iter().rev())
                .find(|tx| tx.involves(address))
                .map(Transaction::hash)
        })
    }

    /// Build and sign a transfer with the correct lineage pointer.
    pub fn create_transaction(
        &self,
        from: Address,
        to: Address,
        amount: Decimal,
        keys: &dyn KeyStore,
    ) -> Result<Transaction> {
        let origin = self.expected_origin(&from);
        Ok(Transaction::new(from, to, amount, origin).signed(keys)?)
    }

    /// Admit a signed transaction into the pending queue.
    ///
    /// Nothing is mutated when the transaction is rejected.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<()> {
        self.ensure_no_fault()?;

        let from = tx.from.ok_or_else(|| {
            LedgerError::Validation("reward transactions cannot be submitted".into())
        })?;
        if tx.amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "amount must be positive, got {}",
                tx.amount
            )));
        }
        if from == tx.to {
            return Err(LedgerError::Validation(format!("self-transfer from {from}")));
        }
        if let Some(block_hash) = tx.block_hash {
            return Err(LedgerError::Validation(format!(
                "transaction already sealed in block {block_hash}"
            )));
        }
        tx.verify_transaction()?;
        if !tx.is_valid()? {
            return Err(LedgerError::Signature(format!(
                "signature on {} does not verify",
                tx.hash()
            )));
        }

        let _admission = self.admission.lock();

        let hash = tx.hash();
        if self.pending.contains(&hash) || self.store.load_transaction_by_hash(&hash)?.is_some() {
            return Err(LedgerError::Validation(format!("duplicate transaction {hash}")));
        }

        let expected = self.expected_origin(&from);
        if tx.origin_tx_hash != expected {
            return Err(LedgerError::Validation(format!(
                "stale lineage pointer: expected {}, got {}",
                display_origin(expected),
                display_origin(tx.origin_tx_hash)
            )));
        }

        let available = self.get_balance_of_address(&from)? - self.pending.debits_of(&from);
        if available < tx.amount {
            return Err(LedgerError::InsufficientFunds {
                address: from,
                required: tx.amount,
                available,
            });
        }

        self.store.insert_pending_transaction(&tx)?;
        debug!(tx = %hash, from = %from, to = %tx.to, amount = %tx.amount, "transaction admitted");
        self.pending.push(tx);
        Ok(())
    }

    // =========================================================================
    // Block Production
    // =========================================================================

    /// Raise the cancellation flag checked by the block being mined.
    pub fn cancel_mining(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Seal blocks while the pending queue holds at least a threshold's worth.
    pub fn mine_pending_transactions(&self) -> Result<MiningOutcome> {
        self.ensure_no_fault()?;

        let threshold = self.config.transaction_threshold;
        if self.pending.len() < threshold {
            return Ok(MiningOutcome::Idle);
        }

        let _guard =
            MiningGuard::acquire_with_timeout(&self.locks, MINING_LOCK, self.config.lock_timeout())
                .ok_or_else(|| {
                    LedgerError::LockUnavailable(format!("{MINING_LOCK} lock is held"))
                })?;
        self.cancel.store(false, Ordering::Relaxed);
        self.set_phase(MiningPhase::Mining);

        let mut sealed = Vec::new();
        while let Some(batch) = self.pending.take_batch(threshold) {
            match self.seal_and_append(batch) {
                Ok(block) => sealed.push(block),
                Err(e) => {
                    let restored = self.pending.restore_batch();
                    warn!(error = %e, restored, "mining cycle aborted, transactions requeued");
                    self.set_phase(MiningPhase::Idle);
                    return Err(e);
                }
            }
        }

        self.set_phase(MiningPhase::Idle);
        if sealed.is_empty() {
            Ok(MiningOutcome::Idle)
        } else {
            Ok(MiningOutcome::Sealed(sealed))
        }
    }

    fn seal_and_append(&self, batch: Vec<Transaction>) -> Result<Block> {
        self.set_phase(MiningPhase::Sealing);

        let tail = self
            .latest_block()
            .ok_or_else(|| LedgerError::ChainIntegrity("chain has no blocks".into()))?;
        if !tail.verify_lineage() {
            return Err(LedgerError::ChainIntegrity(format!(
                "block {} lineage summary does not match its transactions",
                tail.index
            )));
        }

        let mut transactions = batch;
        if let Some(miner) = self.config.miner_address {
            transactions.push(Transaction::reward(miner, self.config.mining_reward));
        }
        let mut block = Block::assemble(
            tail.index + 1,
            tail.hash,
            transactions,
            self.config.difficulty,
        )?;

        let prior = self.balances_from_history()?;
        if !block.has_valid_transactions(|address| prior.get(address).copied().unwrap_or_default())
        {
            return Err(LedgerError::Validation(format!(
                "candidate block {} holds an invalid transaction",
                block.index
            )));
        }

        block.mine_block_cancellable(self.config.difficulty, &self.cancel)?;
        let proofs = proofs_for(&block)?;

        self.set_phase(MiningPhase::Appended);
        {
            let _admission = self.admission.lock();
            if let Err(e) = self.store.insert_block(&block, &proofs) {
                if !self.store_holds(&block)? {
                    return Err(e.into());
                }
                warn!(index = block.index, error = %e, "block stored despite insert error");
            }
            self.chain.write().push(block.clone());
            self.pending.commit_batch();
        }
        info!(
            index = block.index,
            hash = %block.hash,
            nonce = block.nonce,
            transactions = block.tx_count(),
            "block appended"
        );
        Ok(block)
    }

    /// Whether the persisted block at `block.index` is `block` itself.
    fn store_holds(&self, block: &Block) -> Result<bool> {
        Ok(self
            .store
            .load_block_by_height(block.index)?
            .is_some_and(|stored| stored.hash == block.hash))
    }

    // =========================================================================
    // Balances and Validation
    // =========================================================================

    /// Net balance of `address` over the full persisted history.
    pub fn get_balance_of_address(&self, address: &Address) -> Result<Decimal> {
        let transactions = self.store.load_all_transactions()?;
        Ok(net_balances(transactions.iter().filter(|tx| tx.involves(address)))
            .remove(address)
            .unwrap_or_default())
    }

    fn balances_from_history(&self) -> Result<HashMap<Address, Decimal>> {
        let transactions = self.store.load_all_transactions()?;
        Ok(net_balances(&transactions))
    }

    /// Check hashes, links, merkle roots and lineage summaries of the in-memory chain.
    ///
    /// A failure latches an integrity fault.
    pub fn is_chain_valid(&self) -> bool {
        let result = validate_chain(&self.chain.read());
        match result {
            Ok(()) => true,
            Err(reason) => {
                self.latch_fault(&reason);
                false
            }
        }
    }

    /// Recompute every balance from history and compare with the cached balances.
    pub fn validate_database_state(&self) -> Result<()> {
        let result = self.check_database_state();
        if let Err(LedgerError::ChainIntegrity(reason)) = &result {
            self.latch_fault(reason);
        }
        result
    }

    fn check_database_state(&self) -> Result<()> {
        let computed = self.balances_from_history()?;
        let cached: HashMap<Address, Decimal> = self.store.cached_balances()?.into_iter().collect();

        for (address, balance) in &computed {
            if balance.is_sign_negative() {
                return Err(LedgerError::ChainIntegrity(format!(
                    "{address} has negative balance {balance}"
                )));
            }
            let stored = cached.get(address).copied().unwrap_or_default();
            if stored != *balance {
                return Err(LedgerError::ChainIntegrity(format!(
                    "{address} cached balance {stored} differs from history {balance}"
                )));
            }
        }
        for (address, stored) in &cached {
            if !computed.contains_key(address) && !stored.is_zero() {
                return Err(LedgerError::ChainIntegrity(format!(
                    "{address} has cached balance {stored} but no history"
                )));
            }
        }
        Ok(())
    }

    /// Replay every block through transaction validation with running balances.
    pub fn audit_transactions(&self) -> Result<()> {
        let mut running: HashMap<Address, Decimal> = HashMap::new();
        for block in self.chain.read().iter() {
            let valid = block
                .has_valid_transactions(|address| running.get(address).copied().unwrap_or_default());
            if !valid {
                let reason = format!("block {} failed the transaction audit", block.index);
                self.latch_fault(&reason);
                return Err(LedgerError::ChainIntegrity(reason));
            }
            for tx in &block.transactions {
                apply(&mut running, tx);
            }
        }
        Ok(())
    }

    /// Summary of the ledger.
    pub fn stats(&self) -> LedgerStats {
        let chain = self.chain.read();
        let tip = chain.last();
        LedgerStats {
            height: tip.map(|b| b.index).unwrap_or_default(),
            tip_hash: tip.map(|b| b.hash).unwrap_or_default(),
            pending_transactions: self.pending.len(),
            difficulty: self.config.difficulty,
            phase: self.phase(),
        }
    }
}

fn display_origin(origin: Option<Hash>) -> String {
    origin.map_or_else(|| "none".to_string(), |h| h.to_string())
}

/// Inclusion proofs for every transaction of a block.
fn proofs_for(block: &Block) -> Result<Vec<StoredProof>> {
    let tree = block.merkle_tree()?;
    block
        .transactions
        .iter()
        .map(|tx| -> Result<StoredProof> {
            Ok(StoredProof {
                block_hash: block.hash,
                tx_hash: tx.hash(),
                path: tree.proof(&tx.hash())?,
            })
        })
        .collect()
}

/// Ledger statistics.
#[derive(Debug, Clone)]
pub struct LedgerStats {
    /// Index of the tip block.
    pub height: u64,
    pub tip_hash: Hash,
    pub pending_transactions: usize,
    pub difficulty: u32,
    pub phase: MiningPhase,
}

#[cfg(test)]
mod tests {
    use super::*;
    use provchain_core::MemoryKeyStore;
    use provchain_storage::{LocalLockService, Storage};

    struct Fixture {
        ledger: Ledger<Storage, LocalLockService>,
        keys: MemoryKeyStore,
        genesis: Address,
    }

    fn setup(threshold: usize) -> Fixture {
        let keys = MemoryKeyStore::new();
        let genesis = keys.generate_keypair().unwrap();
        let miner = keys.generate_keypair().unwrap();
        let config = LedgerConfig {
            transaction_threshold: threshold,
            difficulty: 1,
            miner_address: Some(miner),
            genesis_address: Some(genesis),
            ..Default::default()
        };
        let ledger = Ledger::open(
            Storage::open_temporary().unwrap(),
            LocalLockService::new(),
            config,
        )
        .unwrap();
        Fixture {
            ledger,
            keys,
            genesis,
        }
    }

    fn send(f: &Fixture, from: Address, to: Address, amount: i64) -> Transaction {
        let tx = f
            .ledger
            .create_transaction(from, to, Decimal::from(amount), &f.keys)
            .unwrap();
        f.ledger.submit_transaction(tx.clone()).unwrap();
        tx
    }

    #[test]
    fn test_open_creates_genesis() {
        let f = setup(2);
        assert_eq!(f.ledger.len(), 1);
        assert!(f.ledger.is_chain_valid());
        assert_eq!(
            f.ledger.get_balance_of_address(&f.genesis).unwrap(),
            Decimal::from(1_000_000)
        );
    }

    #[test]
    fn test_open_requires_genesis_address() {
        let result = Ledger::open(
            Storage::open_temporary().unwrap(),
            LocalLockService::new(),
            LedgerConfig::default(),
        );
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_below_threshold_is_idle() {
        let f = setup(2);
        let a = f.keys.generate_keypair().unwrap();
        send(&f, f.genesis, a, 5);

        let outcome = f.ledger.mine_pending_transactions().unwrap();
        assert!(matches!(outcome, MiningOutcome::Idle));
        assert_eq!(f.ledger.phase(), MiningPhase::Idle);
        assert_eq!(f.ledger.len(), 1);
    }

    #[test]
    fn test_admission_rejections() {
        let f = setup(2);
        let a = f.keys.generate_keypair().unwrap();

        let reward = Transaction::reward(a, Decimal::from(5));
        assert!(matches!(
            f.ledger.submit_transaction(reward),
            Err(LedgerError::Validation(_))
        ));

        let zero = f.ledger.create_transaction(f.genesis, a, Decimal::ZERO, &f.keys).unwrap();
        assert!(matches!(
            f.ledger.submit_transaction(zero),
            Err(LedgerError::Validation(_))
        ));

        let to_self = f.ledger.create_transaction(f.genesis, f.genesis, Decimal::ONE, &f.keys).unwrap();
        assert!(matches!(
            f.ledger.submit_transaction(to_self),
            Err(LedgerError::Validation(_))
        ));

        let unsigned = Transaction::new(f.genesis, a, Decimal::ONE, f.ledger.expected_origin(&f.genesis));
        assert!(matches!(
            f.ledger.submit_transaction(unsigned),
            Err(LedgerError::Signature(_))
        ));

        let broke = f.ledger.create_transaction(a, f.genesis, Decimal::ONE, &f.keys).unwrap();
        assert!(matches!(
            f.ledger.submit_transaction(broke),
            Err(LedgerError::InsufficientFunds { .. })
        ));

        assert!(f.ledger.pending_transactions().is_empty());
    }

    #[test]
    fn test_stale_lineage_and_duplicates_rejected() {
        let f = setup(5);
        let a = f.keys.generate_keypair().unwrap();

        let first = f.ledger.create_transaction(f.genesis, a, Decimal::ONE, &f.keys).unwrap();
        let stale = f.ledger.create_transaction(f.genesis, a, Decimal::TWO, &f.keys).unwrap();
        f.ledger.submit_transaction(first.clone()).unwrap();

        assert!(matches!(
            f.ledger.submit_transaction(stale),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            f.ledger.submit_transaction(first),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(f.ledger.pending_transactions().len(), 1);
    }

    #[test]
    fn test_pending_credits_are_not_spendable() {
        let f = setup(5);
        let a = f.keys.generate_keypair().unwrap();
        let b = f.keys.generate_keypair().unwrap();
        send(&f, f.genesis, a, 10);

        // `a` has nothing confirmed yet.
        let early = f.ledger.create_transaction(a, b, Decimal::ONE, &f.keys).unwrap();
        assert!(matches!(
            f.ledger.submit_transaction(early),
            Err(LedgerError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_pending_debits_count_against_balance() {
        let f = setup(5);
        let a = f.keys.generate_keypair().unwrap();
        send(&f, f.genesis, a, 600_000);

        let over = f
            .ledger
            .create_transaction(f.genesis, a, Decimal::from(500_000), &f.keys)
            .unwrap();
        match f.ledger.submit_transaction(over) {
            Err(LedgerError::InsufficientFunds { available, .. }) => {
                assert_eq!(available, Decimal::from(400_000));
            }
            other => panic!("expected insufficient funds, got {other:?}"),
        }
    }

    #[test]
    fn test_lock_held_returns_unavailable() {
        let f = setup(1);
        let a = f.keys.generate_keypair().unwrap();
        send(&f, f.genesis, a, 5);

        assert!(f.ledger.locks.try_acquire(MINING_LOCK));
        let result = f.ledger.mine_pending_transactions();
        assert!(matches!(result, Err(LedgerError::LockUnavailable(_))));
        assert_eq!(f.ledger.len(), 1);
        assert_eq!(f.ledger.pending_transactions().len(), 1);

        f.ledger.locks.release(MINING_LOCK);
        f.ledger.mine_pending_transactions().unwrap();
        assert_eq!(f.ledger.len(), 2);
    }

    #[test]
    fn test_mines_every_full_batch() {
        let f = setup(1);
        let a = f.keys.generate_keypair().unwrap();
        let b = f.keys.generate_keypair().unwrap();
        send(&f, f.genesis, a, 5);
        send(&f, f.genesis, b, 7);

        let outcome = f.ledger.mine_pending_transactions().unwrap();
        assert_eq!(outcome.blocks().len(), 2);
        assert_eq!(f.ledger.len(), 3);
        assert!(f.ledger.pending_transactions().is_empty());
        assert!(f.ledger.is_chain_valid());
        f.ledger.validate_database_state().unwrap();
        f.ledger.audit_transactions().unwrap();
    }

    #[test]
    fn test_cancelled_mining_requeues() {
        let keys = MemoryKeyStore::new();
        let genesis = keys.generate_keypair().unwrap();
        let config = LedgerConfig {
            transaction_threshold: 1,
            difficulty: 1,
            genesis_address: Some(genesis),
            ..Default::default()
        };
        let ledger = Ledger::open(
            Storage::open_temporary().unwrap(),
            LocalLockService::new(),
            config,
        )
        .unwrap();
        let a = keys.generate_keypair().unwrap();
        let tx = ledger.create_transaction(genesis, a, Decimal::ONE, &keys).unwrap();
        ledger.submit_transaction(tx.clone()).unwrap();

        // Raise difficulty out of reach so only cancellation ends the search.
        let ledger = Ledger {
            config: LedgerConfig {
                difficulty: 64,
                ..ledger.config.clone()
            },
            ..ledger
        };
        std::thread::scope(|s| {
            let handle = s.spawn(|| ledger.mine_pending_transactions());
            while ledger.phase() != MiningPhase::Sealing {
                std::thread::yield_now();
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
            ledger.cancel_mining();
            let result = handle.join().unwrap();
            assert!(matches!(result, Err(LedgerError::MiningCancelled)));
        });

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.pending_transactions(), vec![tx]);
        assert_eq!(ledger.phase(), MiningPhase::Idle);
    }

    #[test]
    fn test_tampered_chain_latches_fault() {
        let f = setup(1);
        let a = f.keys.generate_keypair().unwrap();
        send(&f, f.genesis, a, 5);
        f.ledger.mine_pending_transactions().unwrap();

        f.ledger.chain.write()[1].nonce += 1;
        assert!(!f.ledger.is_chain_valid());
        assert!(f.ledger.integrity_fault().is_some());

        let next = f.ledger.create_transaction(f.genesis, a, Decimal::ONE, &f.keys).unwrap();
        assert!(matches!(
            f.ledger.submit_transaction(next.clone()),
            Err(LedgerError::ChainIntegrity(_))
        ));
        assert!(matches!(
            f.ledger.mine_pending_transactions(),
            Err(LedgerError::ChainIntegrity(_))
        ));

        assert!(f.ledger.acknowledge_integrity_fault().is_some());
        f.ledger.submit_transaction(next).unwrap();
    }

    #[test]
    fn test_validate_chain_detects_field_changes() {
        let f = setup(1);
        let a = f.keys.generate_keypair().unwrap();
        send(&f, f.genesis, a, 5);
        f.ledger.mine_pending_transactions().unwrap();
        let chain = f.ledger.chain();
        assert!(validate_chain(&chain).is_ok());

        let mutations: Vec<Box<dyn Fn(&mut Block)>> = vec![
            Box::new(|b| b.timestamp += 1),
            Box::new(|b| b.nonce += 1),
            Box::new(|b| b.previous_hash = Hash::ZERO),
            Box::new(|b| b.merkle_root = Hash::ZERO),
            Box::new(|b| b.origin_tx_hash = None),
            Box::new(|b| b.transactions[0].amount += Decimal::ONE),
            Box::new(|b| b.hash = Hash::ZERO),
        ];
        for mutate in mutations {
            let mut tampered = chain.clone();
            mutate(&mut tampered[1]);
            assert!(validate_chain(&tampered).is_err());
        }
    }

    #[test]
    fn test_validate_chain_detects_genesis_changes() {
        let f = setup(1);
        let a = f.keys.generate_keypair().unwrap();
        send(&f, f.genesis, a, 5);
        f.ledger.mine_pending_transactions().unwrap();
        let chain = f.ledger.chain();

        let mutations: Vec<Box<dyn Fn(&mut Block)>> = vec![
            Box::new(|b| b.transactions[0].amount = Decimal::from(9_000_000)),
            Box::new(|b| b.timestamp += 1),
            Box::new(|b| b.nonce += 1),
            Box::new(|b| b.merkle_root = Hash::ZERO),
            Box::new(|b| b.origin_tx_hash = Some(Hash::ZERO)),
            Box::new(|b| b.previous_hash = provchain_core::hash(b"elsewhere")),
            Box::new(|b| b.hash = Hash::ZERO),
            Box::new(|b| {
                let extra = b.transactions[0].clone();
                b.transactions.push(extra);
            }),
        ];
        for mutate in mutations {
            let mut tampered = chain.clone();
            mutate(&mut tampered[0]);
            assert!(validate_chain(&tampered).is_err());
        }

        // A lone genesis block is checked as well.
        let mut inflated = vec![chain[0].clone()];
        inflated[0].transactions[0].amount = Decimal::from(9_000_000);
        assert!(validate_chain(&inflated).is_err());
        assert!(validate_chain(&chain[..1]).is_ok());
    }
}
