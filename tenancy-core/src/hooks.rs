use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::collection::CollectionMethod;
use crate::config::TenancyConfigSnapshot;
use crate::query::{Document, Filter, Pipeline, Query, Update};
use crate::scope::ScopeOverride;
use crate::tenant::TenantContext;

/// The operation a hook pipeline is about to run (before hooks may rewrite it).
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Find(Query),
    Count(Filter),
    Insert(Document),
    Update { filter: Filter, update: Update },
    Remove(Filter),
    Aggregate(Pipeline),
}

impl Operation {
    pub fn method(&self) -> CollectionMethod {
        match self {
            Operation::Find(_) => CollectionMethod::Find,
            Operation::Count(_) => CollectionMethod::Count,
            Operation::Insert(_) => CollectionMethod::Insert,
            Operation::Update { .. } => CollectionMethod::Update,
            Operation::Remove(_) => CollectionMethod::Remove,
            Operation::Aggregate(_) => CollectionMethod::Aggregate,
        }
    }

    /// The filter of a matching/counting/updating/deleting operation.
    pub fn filter_mut(&mut self) -> Option<&mut Filter> {
        match self {
            Operation::Find(q) => Some(&mut q.filter),
            Operation::Count(f) | Operation::Remove(f) => Some(f),
            Operation::Update { filter, .. } => Some(filter),
            Operation::Insert(_) | Operation::Aggregate(_) => None,
        }
    }
}

/// Output of a collection call.
#[derive(Debug, Clone, PartialEq)]
pub enum HookResult {
    Many(Vec<Document>),
    One(Document),
    /// Count for `count`, affected rows for `update`/`remove`.
    Count(u64),
}

/// Context passed to hooks.
///
/// The tenant and the scope override are fixed when the call starts. Hooks
/// read them through [`HookContext::tenant`] and [`HookContext::scope`] but
/// cannot replace them:
///
/// ```compile_fail
/// fn widen(ctx: &mut tenancy_core::HookContext) {
///     ctx.scope = tenancy_core::ScopeOverride::ambient();
/// }
/// ```
///
/// ```compile_fail
/// fn forget(ctx: &mut tenancy_core::HookContext) {
///     ctx.tenant = None;
/// }
/// ```
#[derive(Debug)]
pub struct HookContext {
    pub(crate) tenant: Option<TenantContext>,
    pub collection: String,
    pub method: CollectionMethod,
    pub(crate) scope: ScopeOverride,
    pub operation: Operation,
    pub result: Option<HookResult>,
    pub error: Option<anyhow::Error>,
    pub config: TenancyConfigSnapshot,
}

impl HookContext {
    pub fn new(
        tenant: Option<TenantContext>,
        collection: impl Into<String>,
        scope: ScopeOverride,
        operation: Operation,
        config: TenancyConfigSnapshot,
    ) -> Self {
        Self {
            tenant,
            collection: collection.into(),
            method: operation.method(),
            scope,
            operation,
            result: None,
            error: None,
            config,
        }
    }

    /// Tenant context read from the carrier when the call started.
    pub fn tenant(&self) -> Option<&TenantContext> {
        self.tenant.as_ref()
    }

    pub fn scope(&self) -> &ScopeOverride {
        &self.scope
    }
}

#[async_trait]
pub trait BeforeHook: Send + Sync {
    async fn run(&self, ctx: &mut HookContext) -> Result<()>;
}

#[async_trait]
pub trait AfterHook: Send + Sync {
    async fn run(&self, ctx: &mut HookContext) -> Result<()>;
}

/// Runs when any earlier stage failed. Clearing `ctx.error` recovers.
#[async_trait]
pub trait ErrorHook: Send + Sync {
    async fn run(&self, ctx: &mut HookContext) -> Result<()>;
}

/// Hooks registered for one collection (or app-wide).
pub struct CollectionHooks {
    pub(crate) before_all: Vec<Arc<dyn BeforeHook>>,
    pub(crate) before_by_method: HashMap<CollectionMethod, Vec<Arc<dyn BeforeHook>>>,
    pub(crate) after_all: Vec<Arc<dyn AfterHook>>,
    pub(crate) after_by_method: HashMap<CollectionMethod, Vec<Arc<dyn AfterHook>>>,
    pub(crate) error_all: Vec<Arc<dyn ErrorHook>>,
    pub(crate) error_by_method: HashMap<CollectionMethod, Vec<Arc<dyn ErrorHook>>>,
}

impl Default for CollectionHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionHooks {
    pub fn new() -> Self {
        Self {
            before_all: Vec::new(),
            before_by_method: HashMap::new(),
            after_all: Vec::new(),
            after_by_method: HashMap::new(),
            error_all: Vec::new(),
            error_by_method: HashMap::new(),
        }
    }

    pub fn before_all(&mut self, hook: Arc<dyn BeforeHook>) -> &mut Self {
        self.before_all.push(hook);
        self
    }

    pub fn before(&mut self, method: CollectionMethod, hook: Arc<dyn BeforeHook>) -> &mut Self {
        self.before_by_method.entry(method).or_default().push(hook);
        self
    }

    pub fn after_all(&mut self, hook: Arc<dyn AfterHook>) -> &mut Self {
        self.after_all.push(hook);
        self
    }

    pub fn after(&mut self, method: CollectionMethod, hook: Arc<dyn AfterHook>) -> &mut Self {
        self.after_by_method.entry(method).or_default().push(hook);
        self
    }

    /// Register an after hook for insert, update and remove.
    pub fn after_writes(&mut self, hook: Arc<dyn AfterHook>) -> &mut Self {
        for method in CollectionMethod::ALL.iter().filter(|m| m.is_write()) {
            self.after(*method, Arc::clone(&hook));
        }
        self
    }

    pub fn error_all(&mut self, hook: Arc<dyn ErrorHook>) -> &mut Self {
        self.error_all.push(hook);
        self
    }

    pub fn error(&mut self, method: CollectionMethod, hook: Arc<dyn ErrorHook>) -> &mut Self {
        self.error_by_method.entry(method).or_default().push(hook);
        self
    }
}

/// "all" hooks first, then the method-specific ones.
pub(crate) fn collect_method_hooks<H: ?Sized>(
    all: &[Arc<H>],
    by_method: &HashMap<CollectionMethod, Vec<Arc<H>>>,
    method: &CollectionMethod,
) -> Vec<Arc<H>> {
    let mut out = all.to_vec();
    if let Some(v) = by_method.get(method) {
        out.extend(v.iter().cloned());
    }
    out
}
