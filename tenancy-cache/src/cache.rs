use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use tenancy_core::config::{TenancyConfigSnapshot, DEFAULT_CACHE_TTL};
use tenancy_core::TenantContext;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{CacheError, CacheResult};
use crate::key;

static GLOBAL: Lazy<Arc<ReportingCache>> = Lazy::new(|| Arc::new(ReportingCache::default()));

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    stored_at: Instant,
    account_id: String,
    /// `None` for entries whose view spans every entity of the account.
    entity_id: Option<String>,
}

/// Process-wide cache for reporting results, keyed per tenant.
///
/// Entries expire `ttl` after they were stored; an expired entry is removed
/// by the `get` that finds it. Entries are tagged with the account and
/// entity they were computed for so writers can drop them in bulk.
#[derive(Debug)]
pub struct ReportingCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl Default for ReportingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl ReportingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// TTL from `cache.ttl_secs`.
    pub fn from_config(config: &TenancyConfigSnapshot) -> Self {
        Self::new(config.cache_ttl())
    }

    /// The shared instance, created with the default TTL on first use.
    pub fn global() -> Arc<ReportingCache> {
        Arc::clone(&GLOBAL)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn generate_cache_key(tenant: &TenantContext, params: &Value) -> CacheResult<String> {
        key::generate_cache_key(tenant, params)
    }

    /// Fresh payload for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.entries.get(key) {
            None => {
                debug!(key, "reporting cache miss");
                return None;
            }
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                debug!(key, "reporting cache hit");
                return Some(entry.data.clone());
            }
            Some(_) => {}
        }

        // re-check under the shard lock: a concurrent set may have refreshed it
        self.entries
            .remove_if(key, |_, e| e.stored_at.elapsed() >= self.ttl);
        debug!(key, "reporting cache entry expired");
        None
    }

    /// Store `data` under `key`, tagged with the tenant it was computed for.
    pub fn set(
        &self,
        key: impl Into<String>,
        data: Value,
        tenant: &TenantContext,
    ) -> CacheResult<()> {
        let account_id = tenant
            .account_id
            .clone()
            .ok_or(CacheError::Unscoped("store"))?;

        self.entries.insert(
            key.into(),
            CacheEntry {
                data,
                stored_at: Instant::now(),
                account_id,
                entity_id: key::entity_component(tenant).map(str::to_string),
            },
        );
        Ok(())
    }

    /// Drop every entry for `account_id`. With `entity_id`, drop only the
    /// entries tagged with exactly that entity; account-wide entries stay
    /// until they expire.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, account_id: &str, entity_id: Option<&str>) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, e| {
            let hit = e.account_id == account_id
                && match entity_id {
                    None => true,
                    Some(entity) => e.entity_id.as_deref() == Some(entity),
                };
            if hit {
                removed += 1;
            }
            !hit
        });

        info!(
            account_id,
            entity_id = entity_id.unwrap_or("*"),
            removed,
            "reporting cache invalidated"
        );
        removed
    }

    /// Alias of [`invalidate`](Self::invalidate) under its write-path name.
    pub fn invalidate_user_cache(&self, account_id: &str, entity_id: Option<&str>) -> usize {
        self.invalidate(account_id, entity_id)
    }

    pub fn invalidate_all(&self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        info!(removed, "reporting cache cleared");
        removed
    }

    /// Number of stored entries, expired ones included until they are read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serve `params` for `tenant` from the cache, or run `loader` and store
    /// its result.
    ///
    /// Without an account scope nothing is cached and `loader` always runs.
    /// Loader errors are returned as-is and never cached.
    pub async fn get_or_load<F, Fut>(
        &self,
        tenant: &TenantContext,
        params: &Value,
        loader: F,
    ) -> anyhow::Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        let key = match key::generate_cache_key(tenant, params) {
            Ok(key) => key,
            Err(err) => {
                debug!("reporting cache bypassed: {err}");
                return loader().await;
            }
        };

        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }

        let data = loader().await?;
        self.set(key, data.clone(), tenant)?;
        Ok(data)
    }
}
