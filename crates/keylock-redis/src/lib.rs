//! Keylock Redis - lock store running the lock scripts on Redis
//!
//! Each lock script is loaded as a server-side Lua script, so acquire,
//! release and renew are atomic with respect to every other client of the
//! same Redis instance. Records are stored as a hash `{owner, count}` with
//! the lease carried by the key's `PEXPIRE`.

pub mod config;

use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use keylock_core::script::INSPECT_SCRIPT;
use keylock_core::{LockError, LockRecord, LockScript, LockSnapshot, LockStore, Result, ScriptCall};

pub use crate::config::RedisStoreConfig;

/// `LockStore` backed by a Redis server
#[derive(Clone)]
pub struct RedisLockStore {
    connection: ConnectionManager,
    key_prefix: String,
    acquire: Script,
    release: Script,
    renew: Script,
    inspect: Script,
}

impl RedisLockStore {
    /// Connect using `config.url`. The connection manager reconnects on its
    /// own; a failed initial connection is reported as `StoreUnavailable`.
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(LockError::store)?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(LockError::store)?;

        info!(url = %config.redacted_url(), "Connected Redis lock store");

        Ok(Self::from_connection(connection).with_key_prefix(config.key_prefix.clone()))
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            key_prefix: String::new(),
            acquire: Script::new(LockScript::Acquire.source()),
            release: Script::new(LockScript::Release.source()),
            renew: Script::new(LockScript::Renew.source()),
            inspect: Script::new(INSPECT_SCRIPT),
        }
    }

    /// Prefix prepended to every lock key, e.g. `"lock:"`
    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn script(&self, script: LockScript) -> &Script {
        match script {
            LockScript::Acquire => &self.acquire,
            LockScript::Release => &self.release,
            LockScript::Renew => &self.renew,
        }
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn execute(&self, call: ScriptCall<'_>) -> Result<i64> {
        let key = self.storage_key(call.key);
        let mut connection = self.connection.clone();

        let mut invocation = self.script(call.script).key(&key);
        invocation.arg(call.owner);
        if call.script != LockScript::Release {
            invocation.arg(call.lease_ms);
        }

        let reply: i64 = invocation
            .invoke_async(&mut connection)
            .await
            .map_err(LockError::store)?;

        debug!(script = %call.script, key = %key, reply, "Executed lock script");
        Ok(reply)
    }

    async fn inspect(&self, key: &str) -> Result<Option<LockSnapshot>> {
        let key = self.storage_key(key);
        let mut connection = self.connection.clone();

        let reply: Option<(String, i64, i64)> = self
            .inspect
            .key(&key)
            .invoke_async(&mut connection)
            .await
            .map_err(LockError::store)?;

        reply.map(|(owner, count, pttl)| snapshot_from_reply(owner, count, pttl)).transpose()
    }
}

fn snapshot_from_reply(owner: String, count: i64, pttl: i64) -> Result<LockSnapshot> {
    let count = u32::try_from(count)
        .ok()
        .filter(|count| *count > 0)
        .ok_or_else(|| LockError::store(anyhow::anyhow!("invalid lock count {count} in store")))?;

    // PTTL replies -1 for a key without expiry
    let ttl_remaining = u64::try_from(pttl).ok().map(Duration::from_millis);

    Ok(LockSnapshot {
        record: LockRecord { owner, count },
        ttl_remaining,
    })
}
