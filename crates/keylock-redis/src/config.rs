//! Redis store configuration

use config::Config;
use serde::{Deserialize, Serialize};

use keylock_core::{LockError, Result};

pub const REDIS_URL_PROPERTY: &str = "keylock.redis.url";
pub const REDIS_KEY_PREFIX_PROPERTY: &str = "keylock.redis.key-prefix";

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Connection URL, e.g. `redis://:password@host:6379/0`
    pub url: String,
    /// Prefix prepended to every lock key
    #[serde(default)]
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: String::new(),
        }
    }
}

impl RedisStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let url = config
            .get_string(REDIS_URL_PROPERTY)
            .unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
        if url.is_empty() {
            return Err(LockError::InvalidArgument(format!(
                "{REDIS_URL_PROPERTY} must not be empty"
            )));
        }
        let key_prefix = config
            .get_string(REDIS_KEY_PREFIX_PROPERTY)
            .unwrap_or_default();

        Ok(Self { url, key_prefix })
    }

    /// URL with any password replaced, safe for logs
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        match rest.rsplit_once('@') {
            Some((credentials, host)) => {
                let user = credentials.split(':').next().unwrap_or_default();
                format!("{scheme}://{user}:***@{host}")
            }
            None => self.url.clone(),
        }
    }
}
