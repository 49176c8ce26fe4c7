//! Reentrant lease lock handle
//!
//! A [`Lock`] binds a key, a lease and a freshly generated owner token. Every
//! operation is a single atomic script run against the [`LockStore`]; the
//! handle never reads and then writes in two steps, and it mirrors nothing of
//! the stored record except the hold depth returned by the last script.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::LockOptions;
use crate::error::{LockError, Result};
use crate::metrics;
use crate::record::LockSnapshot;
use crate::renewal::LeaseKeeper;
use crate::script::{AcquireOutcome, ReleaseOutcome, RenewOutcome, ScriptCall};
use crate::store::LockStore;
use crate::wait::WaitLoop;

/// Handle to one named distributed lock, owned by a unique identity
pub struct Lock {
    store: Arc<dyn LockStore>,
    key: String,
    owner: String,
    options: LockOptions,
    depth: AtomicU32,
}

impl Lock {
    /// Create a lock on `key` whose acquires grant a lease of `lease_seconds`
    pub fn new(
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        lease_seconds: u32,
    ) -> Result<Self> {
        Self::with_options(store, key, LockOptions::new(lease_seconds))
    }

    pub fn with_options(
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        options: LockOptions,
    ) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(LockError::InvalidArgument(
                "lock key must not be empty".to_string(),
            ));
        }
        options.validate()?;

        Ok(Self {
            store,
            key,
            owner: Uuid::new_v4().simple().to_string(),
            options,
            depth: AtomicU32::new(0),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Identity token fencing this handle's mutations
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn lease(&self) -> Duration {
        self.options.lease
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Local view of the hold depth: 0 when idle, `n` after `n` unreleased
    /// acquires. Lease expiry in the store is not observed until the next
    /// operation on this handle.
    pub fn held_depth(&self) -> u32 {
        self.depth.load(Ordering::Acquire)
    }

    /// Single acquire attempt.
    ///
    /// Returns `true` when the lease was granted or re-entered (the lease is
    /// reset to its full duration either way) and `false` when another owner
    /// holds the key, in which case nothing in the store changed. Re-entering
    /// a hold already at [`MAX_HOLD_DEPTH`](crate::script::MAX_HOLD_DEPTH)
    /// fails with [`LockError::HoldDepthExhausted`], also without any change.
    pub async fn acquire(&self) -> Result<bool> {
        let call = ScriptCall::acquire(&self.key, &self.owner, self.options.lease_ms());
        let reply = self
            .store
            .execute(call)
            .await
            .inspect_err(|_| metrics::record_acquire("error"))?;

        match AcquireOutcome::from_reply(reply)? {
            AcquireOutcome::Acquired { count } => {
                self.depth.store(count, Ordering::Release);
                metrics::record_acquire(if count == 1 { "acquired" } else { "reentered" });
                debug!(key = %self.key, owner = %self.owner, count, "Lock acquired");
                Ok(true)
            }
            AcquireOutcome::HeldByOther => {
                metrics::record_acquire("held_by_other");
                Ok(false)
            }
            AcquireOutcome::DepthExhausted => {
                metrics::record_acquire("depth_exhausted");
                warn!(key = %self.key, owner = %self.owner, "Acquire refused at maximum hold depth");
                Err(LockError::HoldDepthExhausted(self.key.clone()))
            }
        }
    }

    /// Block until the lock is acquired, with no deadline
    pub async fn acquire_wait(&self) -> Result<()> {
        self.acquire_wait_with(None, futures::future::pending())
            .await
    }

    /// Block until the lock is acquired or `timeout` elapses
    pub async fn acquire_wait_timeout(&self, timeout: Duration) -> Result<()> {
        self.acquire_wait_with(Some(timeout), futures::future::pending())
            .await
    }

    /// Block until the lock is acquired or `cancel` completes
    pub async fn acquire_wait_until<C>(&self, cancel: C) -> Result<()>
    where
        C: Future<Output = ()>,
    {
        self.acquire_wait_with(None, cancel).await
    }

    /// Block until the lock is acquired, `timeout` elapses or `cancel`
    /// completes. Store errors end the wait immediately.
    pub async fn acquire_wait_with<C>(&self, timeout: Option<Duration>, cancel: C) -> Result<()>
    where
        C: Future<Output = ()>,
    {
        let started = Instant::now();
        let wait = WaitLoop::new(self.options.retry_interval).with_timeout(timeout);

        match wait.run(|| self.acquire(), cancel).await {
            Ok(stats) => {
                metrics::record_wait("acquired", stats.waited);
                debug!(
                    key = %self.key,
                    owner = %self.owner,
                    attempts = stats.attempts,
                    waited_ms = stats.waited.as_millis() as u64,
                    "Lock acquired after waiting"
                );
                Ok(())
            }
            Err(e) => {
                metrics::record_wait(e.kind(), started.elapsed());
                debug!(key = %self.key, owner = %self.owner, error = %e, "Lock wait ended");
                Err(e)
            }
        }
    }

    /// Release one level of the hold.
    ///
    /// Returns `true` when the count was decremented (deleting the key at
    /// zero) or the key was already absent, and `false` when the key belongs
    /// to another owner, which is left untouched.
    pub async fn release(&self) -> Result<bool> {
        let reply = self
            .store
            .execute(ScriptCall::release(&self.key, &self.owner))
            .await
            .inspect_err(|_| metrics::record_release("error"))?;

        match ReleaseOutcome::from_reply(reply)? {
            ReleaseOutcome::Released { remaining } => {
                self.depth.store(remaining, Ordering::Release);
                metrics::record_release(if remaining == 0 { "released" } else { "decremented" });
                debug!(key = %self.key, owner = %self.owner, remaining, "Lock released");
                Ok(true)
            }
            ReleaseOutcome::NotOwner => {
                self.depth.store(0, Ordering::Release);
                metrics::record_release("not_owner");
                warn!(key = %self.key, owner = %self.owner, "Release rejected, lock held by another owner");
                Ok(false)
            }
        }
    }

    /// Reset the lease to its full duration without changing the hold depth.
    /// Returns `false` when this handle no longer holds the key.
    pub async fn renew(&self) -> Result<bool> {
        let call = ScriptCall::renew(&self.key, &self.owner, self.options.lease_ms());
        let reply = self
            .store
            .execute(call)
            .await
            .inspect_err(|_| metrics::record_renew("error"))?;

        match RenewOutcome::from_reply(reply)? {
            RenewOutcome::Renewed => {
                metrics::record_renew("renewed");
                Ok(true)
            }
            RenewOutcome::NotHeld => {
                self.depth.store(0, Ordering::Release);
                metrics::record_renew("not_held");
                Ok(false)
            }
        }
    }

    /// Current record and remaining lease of the key, whoever holds it
    pub async fn inspect(&self) -> Result<Option<LockSnapshot>> {
        self.store.inspect(&self.key).await
    }

    pub async fn is_held_by_me(&self) -> Result<bool> {
        Ok(self
            .inspect()
            .await?
            .is_some_and(|snapshot| snapshot.record.is_owned_by(&self.owner)))
    }

    /// Spawn a task renewing the lease every `interval` (default a third of
    /// the lease) until stopped or until the lease is lost.
    pub fn keep_alive(self: &Arc<Self>, interval: Option<Duration>) -> LeaseKeeper {
        let interval = interval.unwrap_or(self.options.lease / 3);
        LeaseKeeper::start(self.clone(), interval)
    }
}

impl Debug for Lock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("options", &self.options)
            .field("depth", &self.held_depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLockStore;
    use crate::script::ACQUIRE_DEPTH_EXHAUSTED;
    use async_trait::async_trait;

    /// Store whose owner is already at the deepest hold
    struct SaturatedStore;

    #[async_trait]
    impl LockStore for SaturatedStore {
        async fn execute(&self, _call: ScriptCall<'_>) -> Result<i64> {
            Ok(ACQUIRE_DEPTH_EXHAUSTED)
        }

        async fn inspect(&self, _key: &str) -> Result<Option<LockSnapshot>> {
            Ok(None)
        }
    }

    fn store() -> Arc<MemoryLockStore> {
        Arc::new(MemoryLockStore::new())
    }

    #[test]
    fn test_owner_tokens_are_unique() {
        let store = store();
        let a = Lock::new(store.clone(), "key", 10).unwrap();
        let b = Lock::new(store, "key", 10).unwrap();
        assert_ne!(a.owner(), b.owner());
        assert_eq!(a.owner().len(), 32);
    }

    #[test]
    fn test_invalid_construction() {
        let store = store();
        assert!(matches!(
            Lock::new(store.clone(), "", 10),
            Err(LockError::InvalidArgument(_))
        ));
        assert!(matches!(
            Lock::new(store, "key", 0),
            Err(LockError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_local_depth_tracks_store_count() {
        let lock = Lock::new(store(), "depth-key", 10).unwrap();
        assert_eq!(lock.held_depth(), 0);

        assert!(lock.acquire().await.unwrap());
        assert!(lock.acquire().await.unwrap());
        assert_eq!(lock.held_depth(), 2);

        assert!(lock.release().await.unwrap());
        assert_eq!(lock.held_depth(), 1);
        assert!(lock.is_held_by_me().await.unwrap());

        assert!(lock.release().await.unwrap());
        assert_eq!(lock.held_depth(), 0);
        assert!(lock.inspect().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_renew_keeps_depth() {
        let lock = Lock::new(store(), "renew-key", 10).unwrap();
        assert!(!lock.renew().await.unwrap());

        lock.acquire().await.unwrap();
        assert!(lock.renew().await.unwrap());
        let snapshot = lock.inspect().await.unwrap().unwrap();
        assert_eq!(snapshot.record.count, 1);
        assert_eq!(lock.held_depth(), 1);
    }

    #[tokio::test]
    async fn test_store_error_surfaces() {
        let store = store();
        let lock = Lock::new(store.clone(), "down-key", 10).unwrap();
        store.set_available(false);

        assert!(matches!(
            lock.acquire().await,
            Err(LockError::StoreUnavailable(_))
        ));
        assert!(matches!(
            lock.release().await,
            Err(LockError::StoreUnavailable(_))
        ));
        assert_eq!(lock.held_depth(), 0);
    }

    #[tokio::test]
    async fn test_acquire_at_max_depth_is_refused() {
        let lock = Lock::new(Arc::new(SaturatedStore), "deep-key", 10).unwrap();

        let err = lock.acquire().await.unwrap_err();
        assert!(matches!(err, LockError::HoldDepthExhausted(ref key) if key == "deep-key"));
        assert_eq!(lock.held_depth(), 0);

        // the wait loop ends instead of polling a hold that can never deepen
        let err = lock.acquire_wait().await.unwrap_err();
        assert!(matches!(err, LockError::HoldDepthExhausted(_)));
    }
}
