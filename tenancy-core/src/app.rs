use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use tracing::{debug, Instrument};

use crate::carrier;
use crate::collection::{Collection, CollectionMethod, ID_COLUMN};
use crate::config::{TenancyConfig, TenancyConfigSnapshot};
use crate::errors::TenancyError;
use crate::hooks::{
    collect_method_hooks, AfterHook, BeforeHook, CollectionHooks, ErrorHook, HookContext,
    HookResult, Operation,
};
use crate::query::{Document, Filter, Pipeline, Query, Update};
use crate::registry::{CollectionRegistry, RegisteredCollection};
use crate::schema::CollectionSchema;
use crate::scope::{DimensionScope, ScopeDimension, ScopeOverride};

struct TenancyAppInner {
    registry: RwLock<CollectionRegistry>,
    global_hooks: RwLock<CollectionHooks>,
    collection_hooks: RwLock<HashMap<String, CollectionHooks>>,
    config: RwLock<TenancyConfig>,
}

/// Central container: collection registry, app hooks, per-collection hooks
/// and config.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct TenancyApp {
    inner: Arc<TenancyAppInner>,
}

type HooksForMethod = (
    Vec<Arc<dyn BeforeHook>>,
    Vec<Arc<dyn AfterHook>>,
    Vec<Arc<dyn ErrorHook>>,
);

impl Default for TenancyApp {
    fn default() -> Self {
        Self::new()
    }
}

impl TenancyApp {
    pub fn new() -> Self {
        Self::with_config(TenancyConfig::new())
    }

    pub fn with_config(config: TenancyConfig) -> Self {
        Self {
            inner: Arc::new(TenancyAppInner {
                registry: RwLock::new(CollectionRegistry::new()),
                global_hooks: RwLock::new(CollectionHooks::new()),
                collection_hooks: RwLock::new(HashMap::new()),
                config: RwLock::new(config),
            }),
        }
    }

    /// Register `store` under the schema's name and declare an index on
    /// every scoping column.
    pub async fn register_collection(
        &self,
        schema: CollectionSchema,
        store: Arc<dyn Collection>,
    ) -> Result<()> {
        for column in schema.scope_columns().filter(|c| c.indexed) {
            store.ensure_index(&column.name).await?;
        }

        debug!(
            collection = %schema.name(),
            plugins = schema.plugins().len(),
            "collection registered"
        );
        self.inner.registry.write().register(schema, store);
        Ok(())
    }

    /// App-wide hooks, run before any collection's own.
    pub fn hooks<F>(&self, f: F)
    where
        F: FnOnce(&mut CollectionHooks),
    {
        let mut g = self.inner.global_hooks.write();
        f(&mut g);
    }

    pub(crate) fn configure_collection_hooks<F>(&self, name: &str, f: F)
    where
        F: FnOnce(&mut CollectionHooks),
    {
        let mut map = self.inner.collection_hooks.write();
        let hooks = map.entry(name.to_string()).or_default();
        f(hooks);
    }

    /// Handle for a registered collection, scoped by the ambient context.
    pub fn collection(&self, name: &str) -> Result<ScopedCollection> {
        let registered = self
            .inner
            .registry
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| {
                TenancyError::not_found(format!("Collection not found: {name}")).into_anyhow()
            })?;

        Ok(ScopedCollection {
            app: self.clone(),
            name: name.to_string(),
            registered,
            scope: ScopeOverride::ambient(),
        })
    }

    pub fn set<K, V>(&self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.inner.config.write().set(key, value);
    }

    pub fn config_snapshot(&self) -> TenancyConfigSnapshot {
        self.inner.config.read().snapshot()
    }
}

/// A collection bound to the current call's scope.
///
/// Every operation reads the tenant context from the task-local carrier at
/// call time, so one handle can be shared across requests. The
/// `without_*_scope` and `for_*` builders return a new handle and leave the
/// original untouched.
#[derive(Clone)]
pub struct ScopedCollection {
    app: TenancyApp,
    name: String,
    registered: RegisteredCollection,
    scope: ScopeOverride,
}

impl ScopedCollection {
    pub fn hooks<F>(self, f: F) -> Self
    where
        F: FnOnce(&mut CollectionHooks),
    {
        self.app.configure_collection_hooks(&self.name, f);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.registered.schema
    }

    pub fn scope(&self) -> &ScopeOverride {
        &self.scope
    }

    pub fn with_scope(mut self, scope: ScopeOverride) -> Self {
        self.scope = scope;
        self
    }

    fn scoped(&self, dimension: ScopeDimension, scope: DimensionScope) -> Self {
        let mut next = self.clone();
        next.scope.set(dimension, scope);
        next
    }

    pub fn without_account_scope(&self) -> Self {
        self.scoped(ScopeDimension::Account, DimensionScope::Bypass)
    }

    pub fn without_entity_scope(&self) -> Self {
        self.scoped(ScopeDimension::Entity, DimensionScope::Bypass)
    }

    pub fn without_user_scope(&self) -> Self {
        self.scoped(ScopeDimension::User, DimensionScope::Bypass)
    }

    /// Filter by `account_id` instead of the ambient account.
    pub fn for_account(&self, account_id: impl Into<String>) -> Self {
        self.scoped(
            ScopeDimension::Account,
            DimensionScope::Explicit(account_id.into()),
        )
    }

    pub fn for_entity(&self, entity_id: impl Into<String>) -> Self {
        self.scoped(
            ScopeDimension::Entity,
            DimensionScope::Explicit(entity_id.into()),
        )
    }

    /// Filter reads by `user_id`. Writes still bind the ambient user.
    pub fn for_user(&self, user_id: impl Into<String>) -> Self {
        self.scoped(ScopeDimension::User, DimensionScope::Explicit(user_id.into()))
    }
}

// Pipeline

impl ScopedCollection {
    /// Global hooks first, then the collection's.
    fn collect_hooks_for_method(&self, method: &CollectionMethod) -> HooksForMethod {
        let g = self.app.inner.global_hooks.read();
        let map = self.app.inner.collection_hooks.read();

        let mut before = collect_method_hooks(&g.before_all, &g.before_by_method, method);
        let mut after = collect_method_hooks(&g.after_all, &g.after_by_method, method);
        let mut error = collect_method_hooks(&g.error_all, &g.error_by_method, method);

        if let Some(h) = map.get(&self.name) {
            before.extend(collect_method_hooks(&h.before_all, &h.before_by_method, method));
            after.extend(collect_method_hooks(&h.after_all, &h.after_by_method, method));
            error.extend(collect_method_hooks(&h.error_all, &h.error_by_method, method));
        }

        (before, after, error)
    }

    /// before hooks → alias normalization → scope plugins → required columns
    /// → store call → after hooks (reverse) → error hooks on failure.
    ///
    /// Scope plugins run after user hooks, from the tenant and scope fixed at
    /// call start, so a hook cannot widen the scope.
    async fn run_pipeline(&self, operation: Operation) -> Result<HookContext> {
        let method = operation.method();
        let (before, after, error) = self.collect_hooks_for_method(&method);

        let mut ctx = HookContext::new(
            carrier::tenant(),
            self.name.clone(),
            self.scope.clone(),
            operation,
            self.app.config_snapshot(),
        );

        let span = tracing::debug_span!(
            "scoped_call",
            collection = %self.name,
            method = method.as_str()
        );

        let res = async {
            for h in &before {
                h.run(&mut ctx).await?;
            }

            let schema = &self.registered.schema;
            schema.normalize_aliases(&mut ctx.operation);
            for plugin in schema.plugins() {
                plugin.apply(&mut ctx)?;
            }
            if let Operation::Insert(doc) = &ctx.operation {
                schema.validate_required(doc)?;
            }

            let result = self.call_store(ctx.operation.clone()).await?;
            ctx.result = Some(result);

            for h in after.iter().rev() {
                h.run(&mut ctx).await?;
            }

            Ok::<(), anyhow::Error>(())
        }
        .instrument(span)
        .await;

        if let Err(e) = res {
            ctx.error = Some(e);

            for h in &error {
                let _ = h.run(&mut ctx).await;
            }

            if let Some(err) = ctx.error.take() {
                return Err(err);
            }
        }

        Ok(ctx)
    }

    async fn call_store(&self, operation: Operation) -> Result<HookResult> {
        let store = &self.registered.store;
        Ok(match operation {
            Operation::Find(query) => HookResult::Many(store.find(query).await?),
            Operation::Count(filter) => HookResult::Count(store.count(filter).await?),
            Operation::Insert(doc) => HookResult::One(store.insert(doc).await?),
            Operation::Update { filter, update } => {
                HookResult::Count(store.update(filter, update).await?)
            }
            Operation::Remove(filter) => HookResult::Count(store.remove(filter).await?),
            Operation::Aggregate(pipeline) => HookResult::Many(store.aggregate(pipeline).await?),
        })
    }
}

fn expect_many(method: &str, result: Option<HookResult>) -> Result<Vec<Document>> {
    match result {
        Some(HookResult::Many(v)) => Ok(v),
        None => Ok(vec![]),
        Some(_) => Err(anyhow::anyhow!("{method}() produced an unexpected result")),
    }
}

fn expect_count(method: &str, result: Option<HookResult>) -> Result<u64> {
    match result {
        Some(HookResult::Count(n)) => Ok(n),
        None => Ok(0),
        Some(_) => Err(anyhow::anyhow!("{method}() produced an unexpected result")),
    }
}

// Operations

impl ScopedCollection {
    pub async fn find(&self, query: Query) -> Result<Vec<Document>> {
        let ctx = self.run_pipeline(Operation::Find(query)).await?;
        expect_many("find", ctx.result)
    }

    pub async fn find_one(&self, query: Query) -> Result<Option<Document>> {
        let docs = self.find(query.limit(1)).await?;
        Ok(docs.into_iter().next())
    }

    /// Fetch by primary key. A document outside the caller's scope is
    /// reported as missing.
    pub async fn get(&self, id: &str) -> Result<Document> {
        match self.find_one(Query::new().where_eq(ID_COLUMN, id)).await? {
            Some(doc) => Ok(doc),
            None => crate::bail_tenancy!(not_found, "No record found for id '{}'", id),
        }
    }

    pub async fn count(&self, filter: Filter) -> Result<u64> {
        let ctx = self.run_pipeline(Operation::Count(filter)).await?;
        expect_count("count", ctx.result)
    }

    pub async fn insert(&self, doc: Document) -> Result<Document> {
        let ctx = self.run_pipeline(Operation::Insert(doc)).await?;
        match ctx.result {
            Some(HookResult::One(v)) => Ok(v),
            Some(_) => Err(anyhow::anyhow!("insert() produced an unexpected result")),
            None => Err(anyhow::anyhow!("insert() produced no result")),
        }
    }

    /// Returns the number of documents changed.
    pub async fn update(&self, filter: Filter, update: Update) -> Result<u64> {
        let ctx = self
            .run_pipeline(Operation::Update { filter, update })
            .await?;
        expect_count("update", ctx.result)
    }

    /// Returns the number of documents removed.
    pub async fn remove(&self, filter: Filter) -> Result<u64> {
        let ctx = self.run_pipeline(Operation::Remove(filter)).await?;
        expect_count("remove", ctx.result)
    }

    pub async fn aggregate(&self, pipeline: Pipeline) -> Result<Vec<Document>> {
        let ctx = self.run_pipeline(Operation::Aggregate(pipeline)).await?;
        expect_many("aggregate", ctx.result)
    }
}
