//! Named try-locks guarding critical sections such as mining.

use crate::db::{Result, Storage, LOCK_PREFIX};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// A service handing out named, non-reentrant locks.
pub trait LockService: Send + Sync {
    /// Take the lock if nobody holds it. Never blocks.
    fn try_acquire(&self, name: &str) -> bool;

    /// Release a lock taken with [`LockService::try_acquire`].
    fn release(&self, name: &str);
}

impl<T: LockService + ?Sized> LockService for Arc<T> {
    fn try_acquire(&self, name: &str) -> bool {
        (**self).try_acquire(name)
    }

    fn release(&self, name: &str) {
        (**self).release(name)
    }
}

/// In-process lock table.
#[derive(Default)]
pub struct LocalLockService {
    held: Mutex<HashSet<String>>,
}

impl LocalLockService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockService for LocalLockService {
    fn try_acquire(&self, name: &str) -> bool {
        self.held.lock().insert(name.to_string())
    }

    fn release(&self, name: &str) {
        self.held.lock().remove(name);
    }
}

/// Locks stored in the database under `lock:<name>`, shared by every
/// handle on the same sled database.
///
/// Each entry records the owning process id. sled admits one process per
/// database, so entries owned by any other pid were left behind by a process
/// that exited without releasing them and are cleared on open.
pub struct SledLockService {
    db: sled::Db,
}

impl SledLockService {
    pub fn new(storage: &Storage) -> Result<Self> {
        let db = storage.inner().clone();
        let pid = std::process::id().to_be_bytes();
        for entry in db.scan_prefix(LOCK_PREFIX) {
            let (key, owner) = entry?;
            if owner[..] == pid[..] {
                continue;
            }
            let name = String::from_utf8_lossy(&key[LOCK_PREFIX.len()..]).into_owned();
            tracing::warn!(lock = %name, "releasing lock left by an exited process");
            // Lost races mean another handle already took the lock over.
            let _ = db.compare_and_swap(&key, Some(&owner), None as Option<&[u8]>)?;
        }
        Ok(Self { db })
    }
}

impl LockService for SledLockService {
    fn try_acquire(&self, name: &str) -> bool {
        let key = Storage::lock_key(name);
        let owner = std::process::id().to_be_bytes();
        match self.db.compare_and_swap(key, None as Option<&[u8]>, Some(&owner[..])) {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(e) => {
                tracing::warn!(lock = name, error = %e, "lock acquisition failed");
                false
            }
        }
    }

    fn release(&self, name: &str) {
        if let Err(e) = self.db.remove(Storage::lock_key(name)) {
            tracing::warn!(lock = name, error = %e, "lock release failed");
        }
    }
}
