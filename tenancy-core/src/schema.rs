//! # Collection schema
//!
//! A schema names a collection and carries the scope plugins attached to it.
//! Plugins are kept in [`ScopeDimension::ORDER`] regardless of the order they
//! were attached in, so scoping never depends on registration order.
//!
//! ```rust
//! use tenancy_core::schema::CollectionSchema;
//! use tenancy_core::scope::{ScopePlugin, ScopeSettings};
//!
//! let schema = CollectionSchema::new("tickets")
//!     .with_plugin(ScopePlugin::user(ScopeSettings::required()))
//!     .with_plugin(ScopePlugin::account(ScopeSettings::required()).with_alias("accountId"));
//!
//! let columns: Vec<_> = schema.scope_columns().map(|c| c.name).collect();
//! assert_eq!(columns, vec!["account_id", "user_id"]);
//! ```

use anyhow::Result;
use serde_json::{Map, Value};

use crate::errors::TenancyError;
use crate::hooks::Operation;
use crate::query::{Document, Filter};
use crate::scope::{ScopeColumn, ScopeDimension, ScopePlugin};

#[derive(Debug, Clone)]
pub struct CollectionSchema {
    name: String,
    plugins: Vec<ScopePlugin>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugins: Vec::new(),
        }
    }

    /// Attach a plugin. A second plugin for the same dimension replaces the first.
    pub fn with_plugin(mut self, plugin: ScopePlugin) -> Self {
        self.plugins.retain(|p| p.dimension() != plugin.dimension());
        self.plugins.push(plugin);
        self.plugins
            .sort_by_key(|p| ScopeDimension::ORDER.iter().position(|d| *d == p.dimension()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugins(&self) -> &[ScopePlugin] {
        &self.plugins
    }

    pub fn plugin(&self, dimension: ScopeDimension) -> Option<&ScopePlugin> {
        self.plugins.iter().find(|p| p.dimension() == dimension)
    }

    pub fn scope_columns(&self) -> impl Iterator<Item = ScopeColumn> + '_ {
        self.plugins.iter().map(|p| p.column_spec())
    }

    /// Rewrite alias keys to their column names throughout an operation.
    pub fn normalize_aliases(&self, operation: &mut Operation) {
        for plugin in &self.plugins {
            let Some(alias) = plugin.alias() else {
                continue;
            };
            let column = plugin.column();

            match &mut *operation {
                Operation::Insert(doc) => rename_key(doc, alias, column),
                Operation::Update { filter, update } => {
                    filter.rename(alias, column);
                    rename_key(&mut update.set, alias, column);
                }
                Operation::Aggregate(pipeline) => {
                    pipeline.for_each_match(|f: &mut Filter| f.rename(alias, column));
                }
                op => {
                    if let Some(filter) = op.filter_mut() {
                        filter.rename(alias, column);
                    }
                }
            }
        }
    }

    /// Reject a document that lacks a required scoping column.
    pub fn validate_required(&self, doc: &Document) -> Result<()> {
        let mut errors = Map::new();

        for plugin in self.plugins.iter().filter(|p| p.settings().is_required) {
            let missing = match doc.get(plugin.column()) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            };
            if missing {
                errors.insert(
                    plugin.column().to_string(),
                    Value::Array(vec![Value::String("is required".to_string())]),
                );
            }
        }

        if errors.is_empty() {
            return Ok(());
        }

        Err(
            TenancyError::unprocessable(format!("{} schema validation failed", self.name))
                .with_errors(Value::Object(errors))
                .into_anyhow(),
        )
    }
}

fn rename_key(doc: &mut Document, alias: &str, column: &str) {
    if let Some(v) = doc.remove(alias) {
        if !doc.contains_key(column) {
            doc.insert(column.to_string(), v);
        }
    }
}
