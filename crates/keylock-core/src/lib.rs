//! Keylock Core - reentrant lease locks over an atomic key-value store
//!
//! This crate provides:
//! - `Lock`: per-owner handle with acquire, blocking acquire and release
//! - `WaitLoop`: fixed-interval polling with timeout and cancellation
//! - `LeaseKeeper`: background lease renewal
//! - `LockStore`: the atomic script interface a backing store implements
//! - `MemoryLockStore`: in-process store with TTL semantics
//! - Lock scripts, error taxonomy, configuration and metrics

pub mod config;
pub mod error;
pub mod lock;
pub mod memory;
pub mod metrics;
pub mod record;
pub mod renewal;
pub mod script;
pub mod store;
pub mod wait;

pub use crate::config::{LockOptions, load_settings};
pub use crate::error::{LockError, Result};
pub use crate::lock::Lock;
pub use crate::memory::MemoryLockStore;
pub use crate::metrics::describe_metrics;
pub use crate::record::{LockRecord, LockSnapshot};
pub use crate::renewal::LeaseKeeper;
pub use crate::script::{AcquireOutcome, LockScript, ReleaseOutcome, RenewOutcome, ScriptCall};
pub use crate::store::LockStore;
pub use crate::wait::{WaitLoop, WaitStats};
