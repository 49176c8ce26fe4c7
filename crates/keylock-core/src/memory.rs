//! In-memory lock store
//!
//! Runs the lock scripts natively against a `DashMap`. Each script holds the
//! shard lock of its key for its whole duration, which gives the same per-key
//! atomicity a Redis server gives to Lua scripts. Expired entries behave as
//! absent keys; the optional cleanup task only reclaims their memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{LockError, Result};
use crate::record::{LockRecord, LockSnapshot};
use crate::script::{
    ACQUIRE_DEPTH_EXHAUSTED, LockScript, MAX_HOLD_DEPTH, RELEASE_NOT_OWNER, ScriptCall,
};
use crate::store::LockStore;

/// A stored record plus its expiry
pub(crate) struct MemoryEntry {
    record: LockRecord,
    expires_at: Instant,
}

impl MemoryEntry {
    fn new(owner: &str, expires_at: Instant) -> Self {
        Self {
            record: LockRecord::new(owner),
            expires_at,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Lock store kept in process memory
pub struct MemoryLockStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
    available: AtomicBool,
    cleanup_handle: Option<JoinHandle<()>>,
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            available: AtomicBool::new(true),
            cleanup_handle: None,
        }
    }

    /// Start a background task purging expired entries every `interval`.
    /// Must be called from within a tokio runtime.
    pub fn with_cleanup(mut self, interval: Duration) -> Self {
        let entries = self.entries.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = Self::purge_expired(&entries);
                if purged > 0 {
                    debug!(count = purged, "Cleaned up expired lock entries");
                }
            }
        });

        info!(interval_ms = interval.as_millis() as u64, "MemoryLockStore cleanup task started");
        self.cleanup_handle = Some(handle);
        self
    }

    fn purge_expired(entries: &DashMap<String, MemoryEntry>) -> usize {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(entries.len())
    }

    /// Simulate the store going down (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of keys currently holding an unexpired lease
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LockError::store(anyhow::anyhow!(
                "memory lock store is unavailable"
            )))
        }
    }

    fn acquire(&self, key: &str, owner: &str, lease: Duration, now: Instant) -> i64 {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    *entry = MemoryEntry::new(owner, now + lease);
                    1
                } else if entry.record.is_owned_by(owner) {
                    if entry.record.count >= MAX_HOLD_DEPTH {
                        return ACQUIRE_DEPTH_EXHAUSTED;
                    }
                    entry.record.count += 1;
                    entry.expires_at = now + lease;
                    entry.record.count as i64
                } else {
                    0
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry::new(owner, now + lease));
                1
            }
        }
    }

    fn release(&self, key: &str, owner: &str, now: Instant) -> i64 {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.remove();
                    return 0;
                }
                if !occupied.get().record.is_owned_by(owner) {
                    return RELEASE_NOT_OWNER;
                }
                let remaining = {
                    let entry = occupied.get_mut();
                    entry.record.count = entry.record.count.saturating_sub(1);
                    entry.record.count
                };
                if remaining == 0 {
                    occupied.remove();
                }
                remaining as i64
            }
            Entry::Vacant(_) => 0,
        }
    }

    fn renew(&self, key: &str, owner: &str, lease: Duration, now: Instant) -> i64 {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) && entry.record.is_owned_by(owner) => {
                entry.expires_at = now + lease;
                1
            }
            _ => 0,
        }
    }
}

impl Drop for MemoryLockStore {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn execute(&self, call: ScriptCall<'_>) -> Result<i64> {
        self.check_available()?;

        let now = Instant::now();
        let lease = Duration::from_millis(call.lease_ms);
        let reply = match call.script {
            LockScript::Acquire => self.acquire(call.key, call.owner, lease, now),
            LockScript::Release => self.release(call.key, call.owner, now),
            LockScript::Renew => self.renew(call.key, call.owner, lease, now),
        };
        Ok(reply)
    }

    async fn inspect(&self, key: &str) -> Result<Option<LockSnapshot>> {
        self.check_available()?;

        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| LockSnapshot {
                record: entry.record.clone(),
                ttl_remaining: Some(entry.expires_at.saturating_duration_since(now)),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE_MS: u64 = 10_000;

    async fn acquire(store: &MemoryLockStore, key: &str, owner: &str) -> i64 {
        store
            .execute(ScriptCall::acquire(key, owner, LEASE_MS))
            .await
            .unwrap()
    }

    async fn release(store: &MemoryLockStore, key: &str, owner: &str) -> i64 {
        store
            .execute(ScriptCall::release(key, owner))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = MemoryLockStore::new();

        assert_eq!(acquire(&store, "key1", "owner1").await, 1);
        assert_eq!(release(&store, "key1", "owner1").await, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_acquire_conflict() {
        let store = MemoryLockStore::new();

        assert_eq!(acquire(&store, "key1", "owner1").await, 1);
        // Another owner cannot acquire
        assert_eq!(acquire(&store, "key1", "owner2").await, 0);
        // Same owner re-enters
        assert_eq!(acquire(&store, "key1", "owner1").await, 2);
    }

    #[tokio::test]
    async fn test_release_wrong_owner() {
        let store = MemoryLockStore::new();

        assert_eq!(acquire(&store, "key1", "owner1").await, 1);
        assert_eq!(release(&store, "key1", "owner2").await, RELEASE_NOT_OWNER);

        let snapshot = store.inspect("key1").await.unwrap().unwrap();
        assert_eq!(snapshot.record, LockRecord::new("owner1"));
    }

    #[tokio::test]
    async fn test_release_nonexistent() {
        let store = MemoryLockStore::new();
        assert_eq!(release(&store, "nonexistent", "owner1").await, 0);
        assert!(store.entries.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_after_expiry() {
        let store = MemoryLockStore::new();

        assert_eq!(acquire(&store, "key1", "owner1").await, 1);
        tokio::time::advance(Duration::from_millis(LEASE_MS)).await;

        assert!(store.inspect("key1").await.unwrap().is_none());
        assert_eq!(acquire(&store, "key1", "owner2").await, 1);
        // The previous owner's release is now fenced off
        assert_eq!(release(&store, "key1", "owner1").await, RELEASE_NOT_OWNER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_keeps_ttl() {
        let store = MemoryLockStore::new();

        acquire(&store, "key1", "owner1").await;
        acquire(&store, "key1", "owner1").await;
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(release(&store, "key1", "owner1").await, 1);

        let snapshot = store.inspect("key1").await.unwrap().unwrap();
        assert_eq!(snapshot.ttl_remaining, Some(Duration::from_secs(6)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_resets_lease_only_for_owner() {
        let store = MemoryLockStore::new();

        acquire(&store, "key1", "owner1").await;
        tokio::time::advance(Duration::from_secs(7)).await;

        let renewed = store
            .execute(ScriptCall::renew("key1", "owner1", LEASE_MS))
            .await
            .unwrap();
        assert_eq!(renewed, 1);
        let foreign = store
            .execute(ScriptCall::renew("key1", "owner2", LEASE_MS))
            .await
            .unwrap();
        assert_eq!(foreign, 0);

        let snapshot = store.inspect("key1").await.unwrap().unwrap();
        assert_eq!(snapshot.record.count, 1);
        assert_eq!(snapshot.ttl_remaining, Some(Duration::from_millis(LEASE_MS)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_refuses_past_max_depth() {
        let store = MemoryLockStore::new();

        acquire(&store, "key1", "owner1").await;
        store.entries.get_mut("key1").unwrap().record.count = MAX_HOLD_DEPTH;
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(acquire(&store, "key1", "owner1").await, ACQUIRE_DEPTH_EXHAUSTED);

        // refused acquire leaves both count and lease alone
        let snapshot = store.inspect("key1").await.unwrap().unwrap();
        assert_eq!(snapshot.record.count, MAX_HOLD_DEPTH);
        assert_eq!(snapshot.ttl_remaining, Some(Duration::from_secs(7)));

        assert_eq!(
            release(&store, "key1", "owner1").await,
            i64::from(MAX_HOLD_DEPTH - 1)
        );
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryLockStore::new();
        store.set_available(false);

        let err = store
            .execute(ScriptCall::acquire("key1", "owner1", LEASE_MS))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::StoreUnavailable(_)));

        store.set_available(true);
        assert_eq!(acquire(&store, "key1", "owner1").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_purges_expired() {
        let store = MemoryLockStore::new().with_cleanup(Duration::from_secs(1));

        acquire(&store, "key1", "owner1").await;
        assert_eq!(store.entries.len(), 1);

        tokio::time::sleep(Duration::from_millis(LEASE_MS + 1_500)).await;
        assert!(store.entries.is_empty());
    }
}
