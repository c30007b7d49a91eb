//! Mining lock guard and block production states.

use provchain_core::Block;
use provchain_storage::LockService;
use std::thread;
use std::time::{Duration, Instant};

/// Name of the lock serializing block production.
pub const MINING_LOCK: &str = "mining";

/// Pause between two acquisition attempts while waiting for a lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Where block production currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningPhase {
    /// Waiting for the pending queue to reach the threshold.
    Idle,
    /// Holding the mining lock.
    Mining,
    /// Building, validating and mining a candidate block.
    Sealing,
    /// Committing a sealed block.
    Appended,
}

/// Result of a mining attempt.
#[derive(Debug, Clone)]
pub enum MiningOutcome {
    /// Not enough pending transactions; nothing happened.
    Idle,
    /// Blocks appended during this lock hold, oldest first.
    Sealed(Vec<Block>),
}

impl MiningOutcome {
    pub fn blocks(&self) -> &[Block] {
        match self {
            MiningOutcome::Idle => &[],
            MiningOutcome::Sealed(blocks) => blocks,
        }
    }
}

/// Holds a named lock and releases it when dropped.
pub struct MiningGuard<'a> {
    locks: &'a dyn LockService,
    name: &'a str,
}

impl<'a> MiningGuard<'a> {
    /// Take the lock once.
    pub fn try_acquire(locks: &'a dyn LockService, name: &'a str) -> Option<Self> {
        if locks.try_acquire(name) {
            tracing::debug!(lock = name, "lock acquired");
            Some(Self { locks, name })
        } else {
            None
        }
    }

    /// Keep trying until `timeout` has elapsed. A zero timeout tries once.
    pub fn acquire_with_timeout(
        locks: &'a dyn LockService,
        name: &'a str,
        timeout: Duration,
    ) -> Option<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = Self::try_acquire(locks, name) {
                return Some(guard);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(RETRY_INTERVAL.min(deadline - now));
        }
    }
}

impl Drop for MiningGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(self.name);
        tracing::debug!(lock = self.name, "lock released");
    }
}
