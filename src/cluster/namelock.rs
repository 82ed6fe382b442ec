//! Per-bucket name locks
//!
//! A fixed stripe pool of reader-writer locks keyed by bucket identity.
//! Guards are owned (not borrowed from the pool) so a transaction can
//! park them in a notification listener and release them from the
//! listener's completion callback.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

const STRIPES: usize = 256;

/// Held bucket lock, parkable across await points
#[derive(Debug)]
pub enum NameLockGuard {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// Stripe pool of per-bucket locks
pub struct NameLocker {
    pool: Vec<Arc<RwLock<()>>>,
}

impl Default for NameLocker {
    fn default() -> Self {
        Self::new()
    }
}

impl NameLocker {
    pub fn new() -> Self {
        Self {
            pool: (0..STRIPES).map(|_| Arc::new(RwLock::new(()))).collect(),
        }
    }

    fn stripe(&self, name: &str) -> Arc<RwLock<()>> {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Arc::clone(&self.pool[(hasher.finish() as usize) % STRIPES])
    }

    /// Blocking exclusive lock (create/destroy)
    pub async fn lock(&self, name: &str) -> NameLockGuard {
        NameLockGuard::Write(self.stripe(name).write_owned().await)
    }

    /// Non-blocking exclusive lock; `None` when contended
    pub fn try_lock(&self, name: &str) -> Option<NameLockGuard> {
        self.stripe(name)
            .try_write_owned()
            .ok()
            .map(NameLockGuard::Write)
    }

    /// Non-blocking shared lock (copy-bucket source)
    pub fn try_rlock(&self, name: &str) -> Option<NameLockGuard> {
        self.stripe(name)
            .try_read_owned()
            .ok()
            .map(NameLockGuard::Read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_lock_contention() {
        let locker = NameLocker::new();
        let held = locker.try_lock("ais://foo").unwrap();
        assert!(locker.try_lock("ais://foo").is_none());
        assert!(locker.try_rlock("ais://foo").is_none());
        drop(held);
        assert!(locker.try_lock("ais://foo").is_some());
    }

    #[tokio::test]
    async fn test_shared_readers() {
        let locker = NameLocker::new();
        let r1 = locker.try_rlock("ais://foo").unwrap();
        let r2 = locker.try_rlock("ais://foo").unwrap();
        assert!(locker.try_lock("ais://foo").is_none());
        drop(r1);
        drop(r2);
        assert!(locker.try_lock("ais://foo").is_some());
    }

    #[tokio::test]
    async fn test_blocking_lock_waits() {
        let locker = Arc::new(NameLocker::new());
        let held = locker.lock("ais://foo").await;

        let locker2 = Arc::clone(&locker);
        let waiter = tokio::spawn(async move {
            let _g = locker2.lock("ais://foo").await;
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(held);
        waiter.await.unwrap();
    }
}
