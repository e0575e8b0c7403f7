//! Advisory Locks
//!
//! Cross-replica mutual exclusion for the refresh job. A lock is acquired
//! with [`AdvisoryLock::try_acquire`], which never waits: if another holder
//! exists the caller gets `None` and moves on.
//!
//! Leases are scoped. Calling [`Lease::release`] is the normal exit path, but
//! dropping an unreleased lease (task cancellation, unwinding) must also free
//! the lock, so a holder can never leak it.

use async_trait::async_trait;
use portal_core::StoreResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Numeric lock identifier, shared by every replica using the same store.
pub type LockKey = i64;

/// A held advisory lock.
#[async_trait]
pub trait Lease: Send {
    fn key(&self) -> LockKey;

    /// Release the lock. The lock is freed even if this returns an error.
    async fn release(self) -> StoreResult<()>;
}

/// A store-backed mutual-exclusion primitive.
#[async_trait]
pub trait AdvisoryLock: Send + Sync {
    type Lease: Lease + 'static;

    /// Try to take the lock without waiting. `Ok(None)` means another holder
    /// currently owns it.
    async fn try_acquire(&self, key: LockKey) -> StoreResult<Option<Self::Lease>>;
}

type Holders = Arc<Mutex<HashMap<LockKey, Uuid>>>;

/// Process-local lock table.
///
/// Clones share the same holders, so several handles over one table behave
/// like several replicas connected to the same database.
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    holders: Holders,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `key` if it is free.
    pub fn try_lock(&self, key: LockKey) -> Option<InMemoryLease> {
        let mut holders = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        if holders.contains_key(&key) {
            return None;
        }
        let token = Uuid::now_v7();
        holders.insert(key, token);
        Some(InMemoryLease {
            key,
            token,
            holders: Some(Arc::clone(&self.holders)),
        })
    }

    pub fn is_locked(&self, key: LockKey) -> bool {
        self.holders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key)
    }
}

/// Lease handed out by [`LockTable`].
#[derive(Debug)]
pub struct InMemoryLease {
    key: LockKey,
    token: Uuid,
    holders: Option<Holders>,
}

impl InMemoryLease {
    fn unlock(&mut self) {
        let Some(holders) = self.holders.take() else {
            return;
        };
        let mut holders = holders.lock().unwrap_or_else(PoisonError::into_inner);
        if holders.get(&self.key) == Some(&self.token) {
            holders.remove(&self.key);
        }
    }
}

#[async_trait]
impl Lease for InMemoryLease {
    fn key(&self) -> LockKey {
        self.key
    }

    async fn release(mut self) -> StoreResult<()> {
        self.unlock();
        Ok(())
    }
}

impl Drop for InMemoryLease {
    fn drop(&mut self) {
        self.unlock();
    }
}
