use std::collections::HashMap;

use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use tenancy_core::errors::TenancyError;
use tenancy_core::{carrier, Identity, TenancyApp, TenantContext};
use tracing::{debug, warn};

use crate::params::OverrideParams;
use crate::TenancyAxumError;

/// Middleware: establish the request's [`TenantContext`] in the carrier and
/// run the rest of the stack inside it.
///
/// A context already present in the carrier is reused and only amended from
/// the identity. Override inputs are honored per role: operators may switch
/// account and entity, admins only entity. Anything else is ignored.
///
/// The request never fails here. Without an identity the context stays
/// anonymous and scope plugins pass through.
pub async fn establish_tenant_context(
    State(app): State<TenancyApp>,
    Query(query): Query<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = request.extensions().get::<Identity>().cloned();

    let mut tenant = match carrier::tenant() {
        Some(mut existing) => {
            if let Some(identity) = &identity {
                existing.amend_from(identity);
            }
            existing
        }
        None => identity
            .as_ref()
            .map(TenantContext::from_identity)
            .unwrap_or_else(TenantContext::anonymous),
    };

    let config = app.config_snapshot();
    let overrides = OverrideParams::from_parts(request.headers(), &query, &config);
    apply_overrides(&mut tenant, overrides);

    request.extensions_mut().insert(tenant.clone());

    let store = carrier::snapshot().unwrap_or_default().with_tenant(tenant);
    carrier::scope(store, next.run(request)).await
}

/// Apply the overrides the caller's role allows and drop the rest.
pub fn apply_overrides(tenant: &mut TenantContext, overrides: OverrideParams) {
    let role = tenant.role.map(|r| r.as_str()).unwrap_or("anonymous");

    if let Some(account_id) = overrides.account_id {
        if tenant.override_account(account_id.clone()) {
            debug!(role, account_id = %account_id, "account override applied");
        } else {
            warn!(role, account_id = %account_id, "account override ignored");
        }
    }

    if let Some(entity_id) = overrides.entity_id {
        if tenant.override_entity(entity_id.clone()) {
            debug!(role, entity_id = %entity_id, "entity override applied");
        } else {
            warn!(role, entity_id = %entity_id, "entity override ignored");
        }
    }
}

/// Extractor for the request's tenant context.
///
/// Rejects with `500` when [`establish_tenant_context`] is not installed.
#[derive(Debug, Clone)]
pub struct CurrentTenant(pub TenantContext);

impl<S> FromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = TenancyAxumError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .cloned()
            .map(CurrentTenant)
            .ok_or_else(|| {
                TenancyError::general_error(
                    "TenantContext not found - tenant context middleware not configured",
                )
                .into()
            })
    }
}
