//! Lock configuration
//!
//! Options are plain values passed once at lock construction. They can also
//! be read from a layered [`config::Config`] (file + `KEYLOCK_` environment).

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::error::{LockError, Result};

pub const LEASE_SECONDS_PROPERTY: &str = "keylock.lock.lease-seconds";
pub const RETRY_INTERVAL_PROPERTY: &str = "keylock.lock.retry-interval-ms";

pub const DEFAULT_LEASE_SECONDS: u32 = 30;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 50;

/// Per-lock options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOptions {
    /// Lease granted by every successful acquire
    pub lease: Duration,
    /// Sleep between attempts while waiting on a lock held by another owner
    pub retry_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(DEFAULT_LEASE_SECONDS as u64),
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
        }
    }
}

impl LockOptions {
    pub fn new(lease_seconds: u32) -> Self {
        Self {
            lease: Duration::from_secs(lease_seconds as u64),
            ..Default::default()
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Read options from configuration, falling back to defaults for missing keys
    pub fn from_config(config: &Config) -> Result<Self> {
        let lease_seconds = match config.get_int(LEASE_SECONDS_PROPERTY) {
            Ok(v) => u32::try_from(v).map_err(|_| {
                LockError::InvalidArgument(format!("{LEASE_SECONDS_PROPERTY} out of range: {v}"))
            })?,
            Err(config::ConfigError::NotFound(_)) => DEFAULT_LEASE_SECONDS,
            Err(e) => return Err(e.into()),
        };
        let retry_interval_ms = match config.get_int(RETRY_INTERVAL_PROPERTY) {
            Ok(v) => u64::try_from(v).map_err(|_| {
                LockError::InvalidArgument(format!("{RETRY_INTERVAL_PROPERTY} out of range: {v}"))
            })?,
            Err(config::ConfigError::NotFound(_)) => DEFAULT_RETRY_INTERVAL_MS,
            Err(e) => return Err(e.into()),
        };

        let options = Self::new(lease_seconds)
            .with_retry_interval(Duration::from_millis(retry_interval_ms));
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lease.is_zero() {
            return Err(LockError::InvalidArgument(
                "lease must be positive".to_string(),
            ));
        }
        if self.retry_interval.is_zero() {
            return Err(LockError::InvalidArgument(
                "retry interval must be positive".to_string(),
            ));
        }
        if self.retry_interval >= self.lease {
            return Err(LockError::InvalidArgument(format!(
                "retry interval {:?} must be shorter than lease {:?}",
                self.retry_interval, self.lease
            )));
        }
        Ok(())
    }

    /// Lease in whole milliseconds as sent to the store
    pub fn lease_ms(&self) -> u64 {
        self.lease.as_millis().min(u64::MAX as u128) as u64
    }
}

/// Build layered settings from an optional file, then `KEYLOCK_`-prefixed
/// environment variables (e.g. `KEYLOCK_keylock.lock.lease-seconds=10`).
pub fn load_settings(path: Option<&Path>) -> Result<Config> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix("keylock")
            .prefix_separator("_")
            .separator(".")
            .try_parsing(true),
    );
    Ok(builder.build()?)
}
