//! End-to-end ledger behavior over real storage.

use provchain_chain::{Ledger, LedgerConfig, LedgerError, MiningOutcome, MINING_LOCK};
use provchain_core::{Address, Block, Hash, KeyStore, MemoryKeyStore, Transaction};
use provchain_storage::{
    LocalLockService, LockService, PersistenceGateway, Result as StorageResult, StateManager,
    Storage, StorageError, StoredProof,
};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct Accounts {
    keys: MemoryKeyStore,
    genesis: Address,
    miner: Address,
}

impl Accounts {
    fn new() -> Self {
        let keys = MemoryKeyStore::new();
        let genesis = keys.generate_keypair().unwrap();
        let miner = keys.generate_keypair().unwrap();
        Self {
            keys,
            genesis,
            miner,
        }
    }

    fn config(&self, threshold: usize) -> LedgerConfig {
        LedgerConfig {
            transaction_threshold: threshold,
            mining_reward: Decimal::from(100),
            difficulty: 1,
            miner_address: Some(self.miner),
            genesis_address: Some(self.genesis),
            ..Default::default()
        }
    }
}

fn submit<G: PersistenceGateway, L: LockService>(
    ledger: &Ledger<G, L>,
    keys: &MemoryKeyStore,
    from: Address,
    to: Address,
    amount: i64,
) -> Transaction {
    let tx = ledger
        .create_transaction(from, to, Decimal::from(amount), keys)
        .unwrap();
    ledger.submit_transaction(tx.clone()).unwrap();
    tx
}

#[test]
fn test_end_to_end_balances() {
    let accounts = Accounts::new();
    let a = accounts.keys.generate_keypair().unwrap();
    let b = accounts.keys.generate_keypair().unwrap();
    let ledger = Ledger::open(
        Storage::open_temporary().unwrap(),
        LocalLockService::new(),
        accounts.config(2),
    )
    .unwrap();

    let tx_a = submit(&ledger, &accounts.keys, accounts.genesis, a, 10);
    let tx_b = submit(&ledger, &accounts.keys, accounts.genesis, b, 10);

    let outcome = ledger.mine_pending_transactions().unwrap();
    assert_eq!(outcome.blocks().len(), 1);

    let block = &outcome.blocks()[0];
    assert_eq!(block.index, 1);
    assert_eq!(block.tx_count(), 3);
    assert_eq!(block.transactions[0].hash(), tx_a.hash());
    assert_eq!(block.transactions[1].hash(), tx_b.hash());
    let reward = &block.transactions[2];
    assert!(reward.is_reward());
    assert_eq!(reward.to, accounts.miner);
    assert_eq!(reward.amount, Decimal::from(100));
    assert!(block.transactions.iter().all(|tx| tx.block_hash == Some(block.hash)));
    assert!(block.hash.meets_difficulty(1));

    let balance = |address: &Address| ledger.get_balance_of_address(address).unwrap();
    assert_eq!(balance(&accounts.genesis), Decimal::from(999_980));
    assert_eq!(balance(&a), Decimal::from(10));
    assert_eq!(balance(&b), Decimal::from(10));
    assert_eq!(balance(&accounts.miner), Decimal::from(100));

    assert!(ledger.pending_transactions().is_empty());
    assert!(ledger.is_chain_valid());
    ledger.validate_database_state().unwrap();
    ledger.audit_transactions().unwrap();
    assert!(ledger.verify_inclusion(&tx_b.hash()).unwrap());
    assert_eq!(
        ledger.store().query_balance(&accounts.genesis).unwrap(),
        Decimal::from(999_980)
    );
}

#[test]
fn test_concurrent_mining_seals_once() {
    let accounts = Accounts::new();
    let a = accounts.keys.generate_keypair().unwrap();
    let ledger = Ledger::open(
        Storage::open_temporary().unwrap(),
        Arc::new(LocalLockService::new()),
        accounts.config(2),
    )
    .unwrap();
    submit(&ledger, &accounts.keys, accounts.genesis, a, 1);
    submit(&ledger, &accounts.keys, accounts.genesis, a, 2);

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| s.spawn(|| ledger.mine_pending_transactions()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let sealed: usize = results
        .iter()
        .map(|r| match r {
            Ok(outcome) => outcome.blocks().len(),
            Err(e) => {
                assert!(matches!(e, LedgerError::LockUnavailable(_)), "unexpected {e}");
                0
            }
        })
        .sum();
    assert_eq!(sealed, 1);
    assert_eq!(ledger.len(), 2);
}

#[test]
fn test_held_lock_leaves_state_untouched() {
    let accounts = Accounts::new();
    let a = accounts.keys.generate_keypair().unwrap();
    let locks = Arc::new(LocalLockService::new());
    let ledger = Ledger::open(
        Storage::open_temporary().unwrap(),
        locks.clone(),
        accounts.config(1),
    )
    .unwrap();
    let tx = submit(&ledger, &accounts.keys, accounts.genesis, a, 5);

    assert!(locks.try_acquire(MINING_LOCK));
    assert!(matches!(
        ledger.mine_pending_transactions(),
        Err(LedgerError::LockUnavailable(_))
    ));
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.pending_transactions(), vec![tx]);
    locks.release(MINING_LOCK);

    assert!(matches!(
        ledger.mine_pending_transactions().unwrap(),
        MiningOutcome::Sealed(_)
    ));
}

/// Delegates to `Storage`, failing block inserts while the switch is on.
///
/// With `commit_first` set the failing insert still writes the block, the way
/// a write that lands before a later step errors out would.
struct FailingGateway {
    inner: Storage,
    fail_blocks: Arc<AtomicBool>,
    commit_first: bool,
}

impl FailingGateway {
    fn new(fail_blocks: Arc<AtomicBool>, commit_first: bool) -> Self {
        Self {
            inner: Storage::open_temporary().unwrap(),
            fail_blocks,
            commit_first,
        }
    }
}

impl PersistenceGateway for FailingGateway {
    fn insert_block(&self, block: &Block, proofs: &[StoredProof]) -> StorageResult<()> {
        if self.fail_blocks.load(Ordering::SeqCst) {
            if self.commit_first {
                self.inner.insert_block(block, proofs)?;
            }
            return Err(StorageError::Database(sled::Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            ))));
        }
        self.inner.insert_block(block, proofs)
    }

    fn insert_transaction(&self, tx: &Transaction) -> StorageResult<()> {
        self.inner.insert_transaction(tx)
    }

    fn insert_pending_transaction(&self, tx: &Transaction) -> StorageResult<()> {
        self.inner.insert_pending_transaction(tx)
    }

    fn delete_pending_transactions(&self, hashes: &[Hash]) -> StorageResult<()> {
        self.inner.delete_pending_transactions(hashes)
    }

    fn delete_all_pending_transactions(&self) -> StorageResult<()> {
        self.inner.delete_all_pending_transactions()
    }

    fn load_pending_transactions(&self) -> StorageResult<Vec<Transaction>> {
        self.inner.load_pending_transactions()
    }

    fn load_block_by_hash(&self, hash: &Hash) -> StorageResult<Option<Block>> {
        self.inner.load_block_by_hash(hash)
    }

    fn load_block_by_height(&self, height: u64) -> StorageResult<Option<Block>> {
        self.inner.load_block_by_height(height)
    }

    fn load_chain(&self) -> StorageResult<Vec<Block>> {
        self.inner.load_chain()
    }

    fn load_transaction_by_hash(&self, hash: &Hash) -> StorageResult<Option<Transaction>> {
        self.inner.load_transaction_by_hash(hash)
    }

    fn load_all_transactions(&self) -> StorageResult<Vec<Transaction>> {
        self.inner.load_all_transactions()
    }

    fn query_balance(&self, address: &Address) -> StorageResult<Decimal> {
        self.inner.query_balance(address)
    }

    fn cached_balances(&self) -> StorageResult<Vec<(Address, Decimal)>> {
        self.inner.cached_balances()
    }

    fn insert_merkle_proof(&self, proof: &StoredProof) -> StorageResult<()> {
        self.inner.insert_merkle_proof(proof)
    }

    fn query_merkle_proof(&self, tx_hash: &Hash) -> StorageResult<Option<StoredProof>> {
        self.inner.query_merkle_proof(tx_hash)
    }

    fn height(&self) -> StorageResult<Option<u64>> {
        self.inner.height()
    }
}

#[test]
fn test_failed_append_requeues_in_order() {
    let accounts = Accounts::new();
    let a = accounts.keys.generate_keypair().unwrap();
    let b = accounts.keys.generate_keypair().unwrap();
    let fail_blocks = Arc::new(AtomicBool::new(false));
    let gateway = FailingGateway::new(fail_blocks.clone(), false);
    let ledger = Ledger::open(gateway, LocalLockService::new(), accounts.config(2)).unwrap();

    let first = submit(&ledger, &accounts.keys, accounts.genesis, a, 10);
    let second = submit(&ledger, &accounts.keys, accounts.genesis, b, 10);

    fail_blocks.store(true, Ordering::SeqCst);
    assert!(matches!(
        ledger.mine_pending_transactions(),
        Err(LedgerError::Persistence(_))
    ));
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.pending_transactions(), vec![first.clone(), second.clone()]);
    assert_eq!(ledger.get_balance_of_address(&accounts.miner).unwrap(), Decimal::ZERO);

    fail_blocks.store(false, Ordering::SeqCst);
    let outcome = ledger.mine_pending_transactions().unwrap();
    assert_eq!(outcome.blocks().len(), 1);
    assert_eq!(ledger.len(), 2);

    let rewards = ledger.chain()[1]
        .transactions
        .iter()
        .filter(|tx| tx.is_reward())
        .count();
    assert_eq!(rewards, 1);
    assert_eq!(
        ledger.get_balance_of_address(&accounts.miner).unwrap(),
        Decimal::from(100)
    );
    assert!(ledger.store().load_pending_transactions().unwrap().is_empty());
}

#[test]
fn test_insert_error_after_commit_keeps_block() {
    let accounts = Accounts::new();
    let a = accounts.keys.generate_keypair().unwrap();
    let b = accounts.keys.generate_keypair().unwrap();
    let fail_blocks = Arc::new(AtomicBool::new(false));
    let gateway = FailingGateway::new(fail_blocks.clone(), true);
    let ledger = Ledger::open(gateway, LocalLockService::new(), accounts.config(1)).unwrap();

    fail_blocks.store(true, Ordering::SeqCst);
    submit(&ledger, &accounts.keys, accounts.genesis, a, 10);
    let outcome = ledger.mine_pending_transactions().unwrap();
    assert_eq!(outcome.blocks().len(), 1);
    assert_eq!(ledger.len(), 2);
    assert!(ledger.pending_transactions().is_empty());
    assert_eq!(ledger.store().height().unwrap(), Some(1));

    // The next block still extends the persisted head.
    fail_blocks.store(false, Ordering::SeqCst);
    submit(&ledger, &accounts.keys, accounts.genesis, b, 10);
    assert_eq!(ledger.mine_pending_transactions().unwrap().blocks().len(), 1);
    assert_eq!(ledger.len(), 3);
    assert_eq!(ledger.store().height().unwrap(), Some(2));
    assert!(ledger.is_chain_valid());
    assert!(ledger.validate_database_state().is_ok());
}

#[test]
fn test_admission_rejects_without_mutation() {
    let accounts = Accounts::new();
    let a = accounts.keys.generate_keypair().unwrap();
    let ledger = Ledger::open(
        Storage::open_temporary().unwrap(),
        LocalLockService::new(),
        accounts.config(5),
    )
    .unwrap();

    let stale = ledger
        .create_transaction(accounts.genesis, a, Decimal::from(3), &accounts.keys)
        .unwrap();
    let accepted = submit(&ledger, &accounts.keys, accounts.genesis, a, 4);

    assert!(matches!(
        ledger.submit_transaction(stale),
        Err(LedgerError::Validation(_))
    ));
    assert!(matches!(
        ledger.submit_transaction(accepted.clone()),
        Err(LedgerError::Validation(_))
    ));

    let too_much = ledger
        .create_transaction(accounts.genesis, a, Decimal::from(2_000_000), &accounts.keys)
        .unwrap();
    assert!(matches!(
        ledger.submit_transaction(too_much),
        Err(LedgerError::InsufficientFunds { .. })
    ));

    let mut tampered = ledger
        .create_transaction(accounts.genesis, a, Decimal::from(1), &accounts.keys)
        .unwrap();
    tampered.amount = Decimal::from(900_000);
    assert!(matches!(
        ledger.submit_transaction(tampered),
        Err(LedgerError::HashMismatch { .. })
    ));

    assert_eq!(ledger.pending_transactions(), vec![accepted]);
    assert_eq!(ledger.store().load_pending_transactions().unwrap().len(), 1);
}

#[test]
fn test_tampered_balance_cache_latches_fault() {
    let accounts = Accounts::new();
    let a = accounts.keys.generate_keypair().unwrap();
    let storage = Storage::open_temporary().unwrap();
    let ledger = Ledger::open(storage.clone(), LocalLockService::new(), accounts.config(1)).unwrap();
    submit(&ledger, &accounts.keys, accounts.genesis, a, 10);
    ledger.mine_pending_transactions().unwrap();
    ledger.validate_database_state().unwrap();

    StateManager::new(&storage)
        .set_balance(&a, Decimal::from(10_000))
        .unwrap();

    assert!(matches!(
        ledger.validate_database_state(),
        Err(LedgerError::ChainIntegrity(_))
    ));
    let next = ledger
        .create_transaction(accounts.genesis, a, Decimal::from(1), &accounts.keys)
        .unwrap();
    assert!(matches!(
        ledger.submit_transaction(next.clone()),
        Err(LedgerError::ChainIntegrity(_))
    ));

    assert!(ledger.acknowledge_integrity_fault().is_some());
    ledger.submit_transaction(next).unwrap();
}

#[test]
fn test_reopen_restores_chain_and_pending() {
    let dir = TempDir::new().unwrap();
    let accounts = Accounts::new();
    let a = accounts.keys.generate_keypair().unwrap();

    let (chain, pending) = {
        let ledger = Ledger::open(
            Storage::open(dir.path()).unwrap(),
            LocalLockService::new(),
            accounts.config(1),
        )
        .unwrap();
        submit(&ledger, &accounts.keys, accounts.genesis, a, 10);
        ledger.mine_pending_transactions().unwrap();
        (ledger.chain(), ledger.pending_transactions())
    };
    assert!(pending.is_empty());

    // A higher threshold keeps the next transfer pending.
    let queued = {
        let ledger = Ledger::open(
            Storage::open(dir.path()).unwrap(),
            LocalLockService::new(),
            accounts.config(5),
        )
        .unwrap();
        assert_eq!(ledger.chain(), chain);
        submit(&ledger, &accounts.keys, accounts.genesis, a, 3)
    };

    let ledger = Ledger::open(
        Storage::open(dir.path()).unwrap(),
        LocalLockService::new(),
        accounts.config(5),
    )
    .unwrap();
    assert_eq!(ledger.chain(), chain);
    assert_eq!(ledger.pending_transactions(), vec![queued]);
    assert!(ledger.is_chain_valid());
    assert_eq!(ledger.get_balance_of_address(&a).unwrap(), Decimal::from(10));
}
