//! Store abstraction the lock runs its scripts against

use async_trait::async_trait;

use crate::error::Result;
use crate::record::LockSnapshot;
use crate::script::ScriptCall;

/// An atomic key-value store able to run the lock scripts.
///
/// Implementations must execute each call as one indivisible unit with
/// respect to every other call on the same key, and must leave the key
/// untouched when they return an error.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Execute one lock script and return its integer reply
    async fn execute(&self, call: ScriptCall<'_>) -> Result<i64>;

    /// Read the current record and remaining lease of a key
    async fn inspect(&self, key: &str) -> Result<Option<LockSnapshot>>;
}

