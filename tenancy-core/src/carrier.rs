//! Request-scoped context carrier.
//!
//! Each inbound request runs inside its own [`ContextStore`], bound to the
//! request's future with a tokio task-local. Every `.await` continuation of
//! that future sees the same store; a different request polled on the same
//! worker thread sees its own. Code running outside any scope sees nothing:
//! [`get`] returns `None` and [`set`] reports `false`.
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use tenancy_core::{carrier, TenantContext};
//!
//! let tenant = TenantContext::member("A1", "E1", "u1");
//! carrier::with_tenant(tenant, async {
//!     assert_eq!(carrier::tenant().unwrap().account_id.as_deref(), Some("A1"));
//! })
//! .await;
//!
//! assert!(carrier::tenant().is_none());
//! # }
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::tenant::TenantContext;

/// Key under which the request's [`TenantContext`] is stored.
pub const TENANT_CONTEXT_KEY: &str = "tenant";

type Slot = Arc<dyn Any + Send + Sync>;

/// The key/value partition owned by one request.
#[derive(Clone, Default)]
pub struct ContextStore {
    values: HashMap<&'static str, Slot>,
}

impl fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T>(&mut self, key: &'static str, value: T)
    where
        T: Any + Send + Sync,
    {
        self.values.insert(key, Arc::new(value));
    }

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Any + Clone,
    {
        self.values
            .get(key)
            .and_then(|slot| slot.downcast_ref::<T>())
            .cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn with_tenant(mut self, tenant: TenantContext) -> Self {
        self.insert(TENANT_CONTEXT_KEY, tenant);
        self
    }
}

tokio::task_local! {
    static CARRIER: RefCell<ContextStore>;
}

/// Run `fut` with `store` as its request context.
pub async fn scope<F>(store: ContextStore, fut: F) -> F::Output
where
    F: Future,
{
    CARRIER.scope(RefCell::new(store), fut).await
}

/// Run `fut` inside a fresh, empty request context.
pub async fn run<F>(fut: F) -> F::Output
where
    F: Future,
{
    scope(ContextStore::new(), fut).await
}

/// Run `fut` inside a fresh request context holding `tenant`.
pub async fn with_tenant<F>(tenant: TenantContext, fut: F) -> F::Output
where
    F: Future,
{
    scope(ContextStore::new().with_tenant(tenant), fut).await
}

/// Whether the current task runs inside a request context.
pub fn is_active() -> bool {
    CARRIER.try_with(|_| ()).is_ok()
}

/// Store a value for the rest of the current request.
///
/// Returns `false` when called outside any request context; the value is
/// dropped in that case.
pub fn set<T>(key: &'static str, value: T) -> bool
where
    T: Any + Send + Sync,
{
    CARRIER
        .try_with(|cell| cell.borrow_mut().insert(key, value))
        .is_ok()
}

pub fn get<T>(key: &str) -> Option<T>
where
    T: Any + Clone,
{
    CARRIER
        .try_with(|cell| cell.borrow().get::<T>(key))
        .ok()
        .flatten()
}

/// Copy of the current request's store, if any.
pub fn snapshot() -> Option<ContextStore> {
    CARRIER.try_with(|cell| cell.borrow().clone()).ok()
}

/// Spawn a task that inherits a copy of the current request context.
///
/// Plain `tokio::spawn` starts outside any context; use this for background
/// work that must stay inside the caller's tenant scope.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match snapshot() {
        Some(store) => tokio::spawn(scope(store, fut)),
        None => tokio::spawn(fut),
    }
}

/// The current request's tenant context, if one was established.
pub fn tenant() -> Option<TenantContext> {
    get::<TenantContext>(TENANT_CONTEXT_KEY)
}

/// Replace the current request's tenant context.
pub fn set_tenant(tenant: TenantContext) -> bool {
    set(TENANT_CONTEXT_KEY, tenant)
}
