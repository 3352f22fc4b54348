use anyhow::Result;
use async_trait::async_trait;

use crate::errors::TenancyError;
use crate::query::{Document, Filter, Pipeline, Query, Update};

/// Primary key column.
pub const ID_COLUMN: &str = "_id";

/// Operations a scoped collection exposes.
///
/// Hooks are registered per method or for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionMethod {
    Find,
    Count,
    Insert,
    Update,
    Remove,
    Aggregate,
}

impl CollectionMethod {
    pub const ALL: [CollectionMethod; 6] = [
        CollectionMethod::Find,
        CollectionMethod::Count,
        CollectionMethod::Insert,
        CollectionMethod::Update,
        CollectionMethod::Remove,
        CollectionMethod::Aggregate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionMethod::Find => "find",
            CollectionMethod::Count => "count",
            CollectionMethod::Insert => "insert",
            CollectionMethod::Update => "update",
            CollectionMethod::Remove => "remove",
            CollectionMethod::Aggregate => "aggregate",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            CollectionMethod::Insert | CollectionMethod::Update | CollectionMethod::Remove
        )
    }
}

fn not_implemented(method: &str) -> anyhow::Error {
    TenancyError::not_implemented(format!("Method not implemented: {method}")).into_anyhow()
}

/// The underlying document store, one instance per collection.
///
/// Implementations know nothing about tenants: they execute exactly the
/// filter, document or pipeline they are given. Scoping happens before the
/// call reaches them.
///
/// All methods default to "Method not implemented", so a store can support
/// only what it needs.
#[async_trait]
pub trait Collection: Send + Sync {
    async fn find(&self, _query: Query) -> Result<Vec<Document>> {
        Err(not_implemented("find"))
    }

    async fn count(&self, _filter: Filter) -> Result<u64> {
        Err(not_implemented("count"))
    }

    /// Insert one document and return it as stored.
    async fn insert(&self, _doc: Document) -> Result<Document> {
        Err(not_implemented("insert"))
    }

    /// Apply `update` to every matching document. Returns the number changed.
    async fn update(&self, _filter: Filter, _update: Update) -> Result<u64> {
        Err(not_implemented("update"))
    }

    /// Delete every matching document. Returns the number removed.
    async fn remove(&self, _filter: Filter) -> Result<u64> {
        Err(not_implemented("remove"))
    }

    async fn aggregate(&self, _pipeline: Pipeline) -> Result<Vec<Document>> {
        Err(not_implemented("aggregate"))
    }

    /// Declare a lookup index on `column`. Stores without indexes ignore it.
    async fn ensure_index(&self, _column: &str) -> Result<()> {
        Ok(())
    }
}
