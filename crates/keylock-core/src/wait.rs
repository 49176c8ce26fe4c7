//! Blocking acquisition by fixed-interval polling
//!
//! The store has no "notify on delete" primitive, so a waiter simply retries
//! the single-shot acquire every `retry_interval` until it wins, the caller
//! cancels, or the deadline passes. Waiters are not queued: whichever poll
//! first observes the key free wins.

use std::future::Future;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::{Instant, sleep_until};

use crate::error::{LockError, Result};

/// Outcome of a successful wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitStats {
    /// Number of acquire attempts, including the winning one
    pub attempts: u32,
    pub waited: Duration,
}

/// Polling loop turning a single-shot attempt into a blocking acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitLoop {
    pub retry_interval: Duration,
    pub timeout: Option<Duration>,
}

impl WaitLoop {
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            retry_interval,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `attempt` until it reports success.
    ///
    /// `cancel` is polled before every attempt and raced against every sleep;
    /// once it completes the loop returns [`LockError::Cancelled`]. Errors
    /// from `attempt` end the loop immediately and are never retried.
    pub async fn run<A, Fut, C>(&self, mut attempt: A, cancel: C) -> Result<WaitStats>
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        let started = Instant::now();
        // a deadline past the clock's range never fires
        let deadline = self
            .timeout
            .and_then(|timeout| started.checked_add(timeout));
        let mut attempts = 0u32;

        loop {
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return Err(LockError::DeadlineExceeded(started.elapsed()));
            }
            if (&mut cancel).now_or_never().is_some() {
                return Err(LockError::Cancelled);
            }

            attempts += 1;
            if attempt().await? {
                return Ok(WaitStats {
                    attempts,
                    waited: started.elapsed(),
                });
            }

            let wake_at = match (Instant::now().checked_add(self.retry_interval), deadline) {
                (Some(wake_at), Some(deadline)) => Some(wake_at.min(deadline)),
                (wake_at, deadline) => wake_at.or(deadline),
            };

            tokio::select! {
                biased;
                _ = &mut cancel => return Err(LockError::Cancelled),
                _ = sleep_or_park(wake_at) => {}
            }
        }
    }
}

async fn sleep_or_park(wake_at: Option<Instant>) {
    match wake_at {
        Some(wake_at) => sleep_until(wake_at).await,
        None => futures::future::pending().await,
    }
}
