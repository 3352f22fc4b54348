//! tenancy-cache: reporting cache keyed by tenant scope.
//!
//! Keys always embed the caller's account (and, for entity-bound roles,
//! entity), so two tenants can never share an entry. Entries live for a
//! fixed TTL and can be dropped per account or entity after writes.
//!
//! ```rust
//! use serde_json::json;
//! use tenancy_cache::ReportingCache;
//! use tenancy_core::TenantContext;
//!
//! let cache = ReportingCache::default();
//! let tenant = TenantContext::member("A1", "E1", "u1");
//!
//! let key = ReportingCache::generate_cache_key(&tenant, &json!({ "range": "7d" })).unwrap();
//! cache.set(key.clone(), json!({ "total": 3 }), &tenant).unwrap();
//! assert_eq!(cache.get(&key), Some(json!({ "total": 3 })));
//!
//! cache.invalidate("A1", None);
//! assert!(cache.get(&key).is_none());
//! ```

mod cache;
mod error;
mod hook;
pub mod key;

pub use cache::ReportingCache;
pub use error::{CacheError, CacheResult};
pub use hook::InvalidateOnWrite;
pub use key::{canonical_json, generate_cache_key};
