use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tenancy_core::{AfterHook, DimensionScope, HookContext, HookResult, ScopeDimension};
use tracing::debug;

use crate::ReportingCache;

/// After-hook that drops cached reports once a write succeeded.
///
/// Register it with `CollectionHooks::after_writes`. The account and entity
/// come from an explicit `for_account`/`for_entity` scope, else from the
/// tenant context, else (for inserts) from the stored document. Writers whose
/// role spans entities invalidate the whole account: their own entries are
/// stored without an entity tag, even under an entity override.
#[derive(Debug, Clone)]
pub struct InvalidateOnWrite {
    cache: Arc<ReportingCache>,
}

impl InvalidateOnWrite {
    pub fn new(cache: Arc<ReportingCache>) -> Self {
        Self { cache }
    }

    /// Invalidate the process-wide cache.
    pub fn global() -> Self {
        Self::new(ReportingCache::global())
    }
}

fn resolve(ctx: &HookContext, dimension: ScopeDimension) -> Option<String> {
    if let DimensionScope::Explicit(id) = ctx.scope().get(dimension) {
        return Some(id.clone());
    }
    if let Some(v) = ctx.tenant().and_then(|t| t.scope_value(dimension)) {
        return Some(v.to_string());
    }
    match &ctx.result {
        Some(HookResult::One(doc)) => match doc.get(dimension.default_column()) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        },
        _ => None,
    }
}

#[async_trait]
impl AfterHook for InvalidateOnWrite {
    async fn run(&self, ctx: &mut HookContext) -> Result<()> {
        if !ctx.method.is_write() {
            return Ok(());
        }
        if let Some(HookResult::Count(0)) = ctx.result {
            return Ok(());
        }

        let Some(account_id) = resolve(ctx, ScopeDimension::Account) else {
            debug!(collection = %ctx.collection, "write without account scope; cache left as is");
            return Ok(());
        };
        let entity_id = if ctx.tenant().is_some_and(|t| t.spans_entities()) {
            None
        } else {
            resolve(ctx, ScopeDimension::Entity)
        };

        self.cache.invalidate(&account_id, entity_id.as_deref());
        Ok(())
    }
}
