//! # Configuration
//!
//! A minimal string key/value store, in the spirit of Feathers'
//! `app.set()` / `app.get()`. Components read a [`TenancyConfigSnapshot`]
//! so a running request never observes a half-applied change.
//!
//! ```rust
//! use tenancy_core::config::{TenancyConfig, keys};
//!
//! let mut config = TenancyConfig::new();
//! config.set(keys::CACHE_TTL_SECS, "30");
//!
//! let snap = config.snapshot();
//! assert_eq!(snap.cache_ttl().as_secs(), 30);
//! assert_eq!(snap.account_override_header(), "x-account-id");
//! ```
//!
//! ## Environment overrides
//!
//! [`TenancyConfig::from_env`] maps `PREFIX__CACHE__TTL_SECS=60` to
//! `cache.ttl_secs = 60`.

use std::collections::HashMap;
use std::time::Duration;

/// Well-known configuration keys.
pub mod keys {
    pub const CACHE_TTL_SECS: &str = "cache.ttl_secs";
    pub const ACCOUNT_OVERRIDE_HEADER: &str = "overrides.account_header";
    pub const ENTITY_OVERRIDE_HEADER: &str = "overrides.entity_header";
    pub const ACCOUNT_OVERRIDE_QUERY: &str = "overrides.account_query";
    pub const ENTITY_OVERRIDE_QUERY: &str = "overrides.entity_query";
}

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120);
pub const DEFAULT_ACCOUNT_OVERRIDE_HEADER: &str = "x-account-id";
pub const DEFAULT_ENTITY_OVERRIDE_HEADER: &str = "x-entity-id";
pub const DEFAULT_ACCOUNT_OVERRIDE_QUERY: &str = "accountId";
pub const DEFAULT_ENTITY_OVERRIDE_QUERY: &str = "entityId";

#[derive(Debug, Default)]
pub struct TenancyConfig {
    values: HashMap<String, String>,
}

impl TenancyConfig {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Load every variable starting with `prefix`.
    ///
    /// `TENANCY__CACHE__TTL_SECS` with prefix `TENANCY__` becomes `cache.ttl_secs`.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    pub fn from_vars<I>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::new();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                config.set(normalized, value);
            }
        }
        config
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn snapshot(&self) -> TenancyConfigSnapshot {
        TenancyConfigSnapshot::new(self.values.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TenancyConfigSnapshot {
    map: HashMap<String, String>,
}

impl TenancyConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_duration_secs(&self, key: &str) -> Option<Duration> {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        self.get_duration_secs(keys::CACHE_TTL_SECS)
            .unwrap_or(DEFAULT_CACHE_TTL)
    }

    pub fn account_override_header(&self) -> &str {
        self.get(keys::ACCOUNT_OVERRIDE_HEADER)
            .unwrap_or(DEFAULT_ACCOUNT_OVERRIDE_HEADER)
    }

    pub fn entity_override_header(&self) -> &str {
        self.get(keys::ENTITY_OVERRIDE_HEADER)
            .unwrap_or(DEFAULT_ENTITY_OVERRIDE_HEADER)
    }

    pub fn account_override_query(&self) -> &str {
        self.get(keys::ACCOUNT_OVERRIDE_QUERY)
            .unwrap_or(DEFAULT_ACCOUNT_OVERRIDE_QUERY)
    }

    pub fn entity_override_query(&self) -> &str {
        self.get(keys::ENTITY_OVERRIDE_QUERY)
            .unwrap_or(DEFAULT_ENTITY_OVERRIDE_QUERY)
    }
}
