//! Atomic lock scripts
//!
//! Every lock operation is one script executed atomically by the store. The
//! Lua sources below are what a Redis-compatible store runs server side; the
//! in-memory store implements the same contracts natively. Both must agree on
//! the integer reply codes decoded by [`AcquireOutcome`], [`ReleaseOutcome`]
//! and [`RenewOutcome`].

use std::fmt::{Display, Formatter};

use crate::error::{LockError, Result};

/// `KEYS[1]` = lock key, `ARGV[1]` = owner, `ARGV[2]` = lease in milliseconds.
/// Replies the new count, 0 when another owner holds the key, or -2 when the
/// owner already holds it at [`MAX_HOLD_DEPTH`]. Only a granted acquire
/// writes.
pub const ACQUIRE_SCRIPT: &str = r#"
local owner = redis.call('HGET', KEYS[1], 'owner')
if not owner then
    redis.call('HSET', KEYS[1], 'owner', ARGV[1], 'count', 1)
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
if owner == ARGV[1] then
    if tonumber(redis.call('HGET', KEYS[1], 'count')) >= 4294967295 then
        return -2
    end
    local count = redis.call('HINCRBY', KEYS[1], 'count', 1)
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return count
end
return 0
"#;

/// `KEYS[1]` = lock key, `ARGV[1]` = owner.
/// Replies the remaining count (0 when deleted or absent), or -1 for a
/// foreign owner. The expiry is left untouched.
pub const RELEASE_SCRIPT: &str = r#"
local owner = redis.call('HGET', KEYS[1], 'owner')
if not owner then
    return 0
end
if owner ~= ARGV[1] then
    return -1
end
local count = redis.call('HINCRBY', KEYS[1], 'count', -1)
if count <= 0 then
    redis.call('DEL', KEYS[1])
    return 0
end
return count
"#;

/// `KEYS[1]` = lock key, `ARGV[1]` = owner, `ARGV[2]` = lease in milliseconds.
/// Replies 1 when the lease was reset, 0 otherwise.
pub const RENEW_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'owner') == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// `KEYS[1]` = lock key. Replies nil, or `{owner, count, pttl}`.
pub const INSPECT_SCRIPT: &str = r#"
local owner = redis.call('HGET', KEYS[1], 'owner')
if not owner then
    return false
end
local count = redis.call('HGET', KEYS[1], 'count')
return {owner, tonumber(count), redis.call('PTTL', KEYS[1])}
"#;

pub const RELEASE_NOT_OWNER: i64 = -1;
pub const ACQUIRE_DEPTH_EXHAUSTED: i64 = -2;

/// Deepest reentrant hold a single owner can take on one key
pub const MAX_HOLD_DEPTH: u32 = u32::MAX;

/// Identifies one of the mutating lock scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScript {
    Acquire,
    Release,
    Renew,
}

impl LockScript {
    pub fn source(self) -> &'static str {
        match self {
            LockScript::Acquire => ACQUIRE_SCRIPT,
            LockScript::Release => RELEASE_SCRIPT,
            LockScript::Renew => RENEW_SCRIPT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LockScript::Acquire => "acquire",
            LockScript::Release => "release",
            LockScript::Renew => "renew",
        }
    }
}

impl Display for LockScript {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Arguments of one script execution
#[derive(Debug, Clone, Copy)]
pub struct ScriptCall<'a> {
    pub script: LockScript,
    pub key: &'a str,
    pub owner: &'a str,
    /// Lease in milliseconds; ignored by release
    pub lease_ms: u64,
}

impl<'a> ScriptCall<'a> {
    pub fn acquire(key: &'a str, owner: &'a str, lease_ms: u64) -> Self {
        Self {
            script: LockScript::Acquire,
            key,
            owner,
            lease_ms,
        }
    }

    pub fn release(key: &'a str, owner: &'a str) -> Self {
        Self {
            script: LockScript::Release,
            key,
            owner,
            lease_ms: 0,
        }
    }

    pub fn renew(key: &'a str, owner: &'a str, lease_ms: u64) -> Self {
        Self {
            script: LockScript::Renew,
            key,
            owner,
            lease_ms,
        }
    }
}

fn unexpected(script: LockScript, reply: i64) -> LockError {
    LockError::store(anyhow::anyhow!(
        "unexpected reply {} from {} script",
        reply,
        script
    ))
}

fn to_count(script: LockScript, reply: i64) -> Result<u32> {
    u32::try_from(reply).map_err(|_| unexpected(script, reply))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Lease granted; `count` is the owner's hold depth after this call
    Acquired { count: u32 },
    HeldByOther,
    /// The owner already holds the key at [`MAX_HOLD_DEPTH`]; nothing changed
    DepthExhausted,
}

impl AcquireOutcome {
    pub fn from_reply(reply: i64) -> Result<Self> {
        match reply {
            0 => Ok(AcquireOutcome::HeldByOther),
            ACQUIRE_DEPTH_EXHAUSTED => Ok(AcquireOutcome::DepthExhausted),
            n if n > 0 => Ok(AcquireOutcome::Acquired {
                count: to_count(LockScript::Acquire, n)?,
            }),
            n => Err(unexpected(LockScript::Acquire, n)),
        }
    }

    pub fn is_acquired(self) -> bool {
        matches!(self, AcquireOutcome::Acquired { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Count decremented, or the key was already absent. `remaining == 0`
    /// means the key no longer exists.
    Released { remaining: u32 },
    NotOwner,
}

impl ReleaseOutcome {
    pub fn from_reply(reply: i64) -> Result<Self> {
        match reply {
            RELEASE_NOT_OWNER => Ok(ReleaseOutcome::NotOwner),
            n if n >= 0 => Ok(ReleaseOutcome::Released {
                remaining: to_count(LockScript::Release, n)?,
            }),
            n => Err(unexpected(LockScript::Release, n)),
        }
    }

    pub fn is_released(self) -> bool {
        matches!(self, ReleaseOutcome::Released { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    NotHeld,
}

impl RenewOutcome {
    pub fn from_reply(reply: i64) -> Result<Self> {
        match reply {
            1 => Ok(RenewOutcome::Renewed),
            0 => Ok(RenewOutcome::NotHeld),
            n => Err(unexpected(LockScript::Renew, n)),
        }
    }
}
