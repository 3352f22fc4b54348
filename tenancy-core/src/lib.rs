//! tenancy-core: tenant context propagation and automatic query scoping.
//!
//! A request's [`TenantContext`] is established once at the edge, carried in
//! a task-local [`carrier`] through every await point, and applied by
//! [`ScopePlugin`]s to each operation a [`ScopedCollection`] runs.

pub mod app;
pub mod carrier;
pub mod collection;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod identity;
pub mod memory;
pub mod query;
pub mod registry;
pub mod schema;
pub mod scope;
pub mod tenant;

pub use app::{ScopedCollection, TenancyApp};
pub use carrier::ContextStore;
pub use collection::{Collection, CollectionMethod, ID_COLUMN};
pub use config::{TenancyConfig, TenancyConfigSnapshot};
pub use errors::{ErrorKind, TenancyError};
pub use hooks::{
    AfterHook, BeforeHook, CollectionHooks, ErrorHook, HookContext, HookResult, Operation,
};
pub use identity::{Identity, IdentityError};
pub use memory::MemoryCollection;
pub use query::{Condition, Document, Filter, Pipeline, Query, SortKey, SortOrder, Stage, Update};
pub use registry::CollectionRegistry;
pub use schema::CollectionSchema;
pub use scope::{
    DimensionScope, ScopeColumn, ScopeDimension, ScopeOverride, ScopePlugin, ScopeSettings,
    WriteMode,
};
pub use tenant::{Role, RolePolicy, TenantContext};
