//! # Scope plugins
//!
//! A [`ScopePlugin`] enforces one ownership dimension (account, entity or
//! user) on a collection. The three plugins differ only in which
//! [`TenantContext`] field they read, which column they manage and how they
//! bind that column on writes:
//!
//! | plugin  | column       | write mode |
//! |---------|--------------|------------|
//! | account | `account_id` | soft-set   |
//! | entity  | `entity_id`  | soft-set   |
//! | user    | `user_id`    | hard-set   |
//!
//! For every find/count/update/remove the plugin pins its column to the
//! resolved scope value; for aggregations it prepends a `Match` stage unless
//! the leading matches already pin it. Without a scope value the operation
//! passes through unfiltered. That is deliberate: endpoints that need a
//! tenant must be guarded by authentication upstream.
//!
//! A [`ScopeOverride`] on the call can bypass a plugin or replace the ambient
//! value with an explicit id.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::errors::TenancyError;
use crate::hooks::{BeforeHook, HookContext, Operation};
use crate::query::{Document, Filter, Stage};
use crate::tenant::TenantContext;

/// Ownership dimension a plugin enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeDimension {
    Account,
    Entity,
    User,
}

impl ScopeDimension {
    /// Fixed application order. Plugins on one collection always run in it.
    pub const ORDER: [ScopeDimension; 3] = [
        ScopeDimension::Account,
        ScopeDimension::Entity,
        ScopeDimension::User,
    ];

    pub fn default_column(self) -> &'static str {
        match self {
            ScopeDimension::Account => "account_id",
            ScopeDimension::Entity => "entity_id",
            ScopeDimension::User => "user_id",
        }
    }

    pub fn write_mode(self) -> WriteMode {
        match self {
            ScopeDimension::Account | ScopeDimension::Entity => WriteMode::SoftSet,
            ScopeDimension::User => WriteMode::HardSet,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScopeDimension::Account => "account",
            ScopeDimension::Entity => "entity",
            ScopeDimension::User => "user",
        }
    }
}

/// How a plugin binds its column when a document is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fill the column from context only when the document leaves it unset.
    SoftSet,
    /// Always overwrite the column from context; fail the write without one.
    HardSet,
}

/// Per-call scope for one dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DimensionScope {
    /// Use the ambient tenant context.
    #[default]
    Ambient,
    /// Escape hatch: no filtering for this dimension.
    Bypass,
    /// Filter by this id, ignoring the ambient context.
    Explicit(String),
}

/// Which scopes a single call bypasses or pins explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeOverride {
    pub account: DimensionScope,
    pub entity: DimensionScope,
    pub user: DimensionScope,
}

impl ScopeOverride {
    pub fn ambient() -> Self {
        Self::default()
    }

    pub fn get(&self, dimension: ScopeDimension) -> &DimensionScope {
        match dimension {
            ScopeDimension::Account => &self.account,
            ScopeDimension::Entity => &self.entity,
            ScopeDimension::User => &self.user,
        }
    }

    pub fn set(&mut self, dimension: ScopeDimension, scope: DimensionScope) {
        match dimension {
            ScopeDimension::Account => self.account = scope,
            ScopeDimension::Entity => self.entity = scope,
            ScopeDimension::User => self.user = scope,
        }
    }

    pub fn without(mut self, dimension: ScopeDimension) -> Self {
        self.set(dimension, DimensionScope::Bypass);
        self
    }

    pub fn explicit(mut self, dimension: ScopeDimension, id: impl Into<String>) -> Self {
        self.set(dimension, DimensionScope::Explicit(id.into()));
        self
    }
}

/// Plugin configuration, fixed at registration time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeSettings {
    /// Whether a stored document must carry the scoping column.
    pub is_required: bool,
}

impl ScopeSettings {
    pub fn required() -> Self {
        Self { is_required: true }
    }

    pub fn optional() -> Self {
        Self { is_required: false }
    }
}

/// Column a plugin adds to its collection's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeColumn {
    pub dimension: ScopeDimension,
    pub name: String,
    pub alias: Option<String>,
    pub required: bool,
    pub indexed: bool,
}

/// Why a plugin left an operation unfiltered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassThrough {
    EscapeHatch,
    NoContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Scoped(String),
    Unscoped(PassThrough),
}

#[derive(Debug, Clone)]
pub struct ScopePlugin {
    dimension: ScopeDimension,
    column: String,
    alias: Option<String>,
    settings: ScopeSettings,
}

impl ScopePlugin {
    pub fn new(dimension: ScopeDimension, settings: ScopeSettings) -> Self {
        Self {
            dimension,
            column: dimension.default_column().to_string(),
            alias: None,
            settings,
        }
    }

    pub fn account(settings: ScopeSettings) -> Self {
        Self::new(ScopeDimension::Account, settings)
    }

    pub fn entity(settings: ScopeSettings) -> Self {
        Self::new(ScopeDimension::Entity, settings)
    }

    pub fn user(settings: ScopeSettings) -> Self {
        Self::new(ScopeDimension::User, settings)
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn dimension(&self) -> ScopeDimension {
        self.dimension
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn settings(&self) -> ScopeSettings {
        self.settings
    }

    pub fn write_mode(&self) -> WriteMode {
        self.dimension.write_mode()
    }

    pub fn column_spec(&self) -> ScopeColumn {
        ScopeColumn {
            dimension: self.dimension,
            name: self.column.clone(),
            alias: self.alias.clone(),
            required: self.settings.is_required,
            indexed: true,
        }
    }

    fn resolve(&self, tenant: Option<&TenantContext>, scope: &ScopeOverride) -> Resolution {
        match scope.get(self.dimension) {
            DimensionScope::Bypass => Resolution::Unscoped(PassThrough::EscapeHatch),
            DimensionScope::Explicit(id) => Resolution::Scoped(id.clone()),
            DimensionScope::Ambient => tenant
                .and_then(|t| t.scope_value(self.dimension))
                .map(|v| Resolution::Scoped(v.to_string()))
                .unwrap_or(Resolution::Unscoped(PassThrough::NoContext)),
        }
    }

    /// Rewrite `ctx.operation` for this plugin's dimension.
    pub fn apply(&self, ctx: &mut HookContext) -> Result<()> {
        let resolution = self.resolve(ctx.tenant.as_ref(), &ctx.scope);

        match &mut ctx.operation {
            Operation::Insert(doc) => {
                self.bind_insert(doc, &resolution, ctx.tenant.as_ref(), &ctx.collection)
            }
            Operation::Update { filter, update } => {
                self.narrow_filter(filter, &resolution, &ctx.collection);
                self.bind_update(&mut update.set, &resolution, ctx.tenant.as_ref(), &ctx.collection)
            }
            Operation::Aggregate(pipeline) => {
                match &resolution {
                    Resolution::Scoped(value) => {
                        if pipeline.leading_match_pins(&self.column, value) {
                            trace!(
                                collection = %ctx.collection,
                                column = %self.column,
                                "pipeline already scoped"
                            );
                        } else {
                            let mut filter = Filter::new();
                            filter.pin(&self.column, value);
                            pipeline.prepend(Stage::Match(filter));
                            trace!(
                                collection = %ctx.collection,
                                column = %self.column,
                                "prepended scope stage"
                            );
                        }
                    }
                    Resolution::Unscoped(reason) => self.log_pass_through(*reason, &ctx.collection),
                }
                Ok(())
            }
            op => {
                if let Some(filter) = op.filter_mut() {
                    self.narrow_filter(filter, &resolution, &ctx.collection);
                }
                Ok(())
            }
        }
    }

    fn narrow_filter(&self, filter: &mut Filter, resolution: &Resolution, collection: &str) {
        match resolution {
            Resolution::Scoped(value) => {
                filter.pin(&self.column, value);
                trace!(collection = %collection, column = %self.column, "scope filter applied");
            }
            Resolution::Unscoped(reason) => self.log_pass_through(*reason, collection),
        }
    }

    fn bind_insert(
        &self,
        doc: &mut Document,
        resolution: &Resolution,
        tenant: Option<&TenantContext>,
        collection: &str,
    ) -> Result<()> {
        match self.write_mode() {
            WriteMode::SoftSet => {
                if is_unset(doc.get(&self.column)) {
                    if let Resolution::Scoped(value) = resolution {
                        doc.insert(self.column.clone(), Value::String(value.clone()));
                    }
                }
                Ok(())
            }
            WriteMode::HardSet => {
                let value = self.hard_value(tenant, collection)?;
                doc.insert(self.column.clone(), Value::String(value));
                Ok(())
            }
        }
    }

    fn bind_update(
        &self,
        set: &mut Document,
        resolution: &Resolution,
        tenant: Option<&TenantContext>,
        collection: &str,
    ) -> Result<()> {
        if !set.contains_key(&self.column) {
            return Ok(());
        }

        match self.write_mode() {
            WriteMode::SoftSet => {
                // the column may only move inside the caller's own scope
                if let Resolution::Scoped(value) = resolution {
                    set.insert(self.column.clone(), Value::String(value.clone()));
                }
                Ok(())
            }
            WriteMode::HardSet => {
                let value = self.hard_value(tenant, collection)?;
                set.insert(self.column.clone(), Value::String(value));
                Ok(())
            }
        }
    }

    /// Hard-set always reads the ambient context; overrides cannot spoof it.
    fn hard_value(&self, tenant: Option<&TenantContext>, collection: &str) -> Result<String> {
        match tenant.and_then(|t| t.scope_value(self.dimension)) {
            Some(v) => Ok(v.to_string()),
            None => {
                warn!(
                    collection = %collection,
                    column = %self.column,
                    "write aborted: no {} in tenant context",
                    self.dimension.as_str()
                );
                Err(TenancyError::forbidden(format!(
                    "Cannot write to '{collection}': no {} in the current tenant context to bind '{}'",
                    self.dimension.as_str(),
                    self.column
                ))
                .into_anyhow())
            }
        }
    }

    fn log_pass_through(&self, reason: PassThrough, collection: &str) {
        match reason {
            PassThrough::EscapeHatch => {
                debug!(collection = %collection, column = %self.column, "scope bypassed by caller")
            }
            PassThrough::NoContext => {
                debug!(collection = %collection, column = %self.column, "no scope value in context")
            }
        }
    }
}

fn is_unset(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

#[async_trait]
impl BeforeHook for ScopePlugin {
    async fn run(&self, ctx: &mut HookContext) -> Result<()> {
        self.apply(ctx)
    }
}
