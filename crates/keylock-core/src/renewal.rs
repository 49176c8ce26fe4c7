//! Background lease renewal

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, Instant};
use tracing::{debug, error, warn};

use crate::lock::Lock;

/// Keeps a held lease alive by renewing it at a fixed interval.
///
/// The task exits when [`LeaseKeeper::stop`] is called, when a renewal finds
/// the lease gone, or when the store fails. Dropping the keeper aborts it.
pub struct LeaseKeeper {
    stop_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl LeaseKeeper {
    /// Must be called from within a tokio runtime
    pub fn start(lock: Arc<Lock>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let interval = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(Self::run(lock, interval, stop_rx));

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    async fn run(lock: Arc<Lock>, interval: Duration, mut stop_rx: mpsc::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match lock.renew().await {
                        Ok(true) => {
                            debug!(key = %lock.key(), owner = %lock.owner(), "Lease renewed");
                        }
                        Ok(false) => {
                            warn!(key = %lock.key(), owner = %lock.owner(), "Lease lost, stopping renewal");
                            break;
                        }
                        Err(e) => {
                            error!(key = %lock.key(), owner = %lock.owner(), error = %e, "Lease renewal failed");
                            break;
                        }
                    }
                }
                _ = stop_rx.recv() => {
                    break;
                }
            }
        }
    }

    /// Ask the renewal task to exit after its current round trip
    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Stop the task and wait for it to exit
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|handle| handle.is_finished())
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLockStore;

    #[tokio::test(start_paused = true)]
    async fn test_keeper_extends_lease_past_expiry() {
        let store = Arc::new(MemoryLockStore::new());
        let lock = Arc::new(Lock::new(store.clone(), "kept", 3).unwrap());
        assert!(lock.acquire().await.unwrap());

        let keeper = lock.keep_alive(None);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let rival = Lock::new(store, "kept", 3).unwrap();
        assert!(!rival.acquire().await.unwrap());
        assert_eq!(lock.held_depth(), 1);

        keeper.shutdown().await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rival.acquire().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeper_stops_when_lease_lost() {
        let store = Arc::new(MemoryLockStore::new());
        let lock = Arc::new(Lock::new(store, "lost", 3).unwrap());
        assert!(lock.acquire().await.unwrap());

        let keeper = lock.keep_alive(Some(Duration::from_secs(1)));
        assert!(lock.release().await.unwrap());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(keeper.is_finished());
    }
}
