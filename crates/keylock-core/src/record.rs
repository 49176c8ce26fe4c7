//! Lock record model

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Field holding the owner token inside a stored lock record
pub const OWNER_FIELD: &str = "owner";
/// Field holding the reentrancy count inside a stored lock record
pub const COUNT_FIELD: &str = "count";

/// The stored value of one held lock. Its lease lives in the store's native
/// key expiration, not in the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Token of the lock instance holding the lease
    pub owner: String,
    /// Number of unreleased acquires made by the owner (always >= 1)
    pub count: u32,
}

impl LockRecord {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            count: 1,
        }
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner == owner
    }
}

/// Read-only view of a record together with its remaining lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub record: LockRecord,
    /// Remaining lease, `None` when the key carries no expiry
    pub ttl_remaining: Option<Duration>,
}
