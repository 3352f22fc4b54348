//! Identity resolution: the authentication seam in front of tenant context
//! establishment.
//!
//! A [`IdentityResolver`] turns request headers into an [`Identity`]. The
//! [`resolve_identity`] middleware validates it against the role table and
//! stores it in the request extensions; an inconsistent identity is rejected
//! with `401` before any tenant context exists.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tenancy_core::errors::TenancyError;
use tenancy_core::{Identity, Role};
use tracing::{debug, warn};

use crate::TenancyAxumError;

#[async_trait]
pub trait IdentityResolver: Send + Sync + 'static {
    /// `Ok(None)` means the request carries no identity at all.
    async fn resolve(&self, headers: &HeaderMap) -> anyhow::Result<Option<Identity>>;
}

/// Reads an identity a trusted gateway already authenticated and forwarded
/// as plain headers.
#[derive(Debug, Clone)]
pub struct HeaderIdentityResolver {
    pub subject_header: String,
    pub role_header: String,
    pub account_header: String,
    pub entity_header: String,
}

impl Default for HeaderIdentityResolver {
    fn default() -> Self {
        Self {
            subject_header: "x-auth-subject".to_string(),
            role_header: "x-auth-role".to_string(),
            account_header: "x-auth-account".to_string(),
            entity_header: "x-auth-entity".to_string(),
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl IdentityResolver for HeaderIdentityResolver {
    async fn resolve(&self, headers: &HeaderMap) -> anyhow::Result<Option<Identity>> {
        let Some(subject) = header(headers, &self.subject_header) else {
            return Ok(None);
        };

        let role: Role = header(headers, &self.role_header)
            .unwrap_or_default()
            .parse()
            .map_err(|e: tenancy_core::IdentityError| e.into_anyhow())?;

        let mut identity = Identity::new(subject, role);
        identity.account_id = header(headers, &self.account_header).map(str::to_string);
        identity.entity_id = header(headers, &self.entity_header).map(str::to_string);
        Ok(Some(identity))
    }
}

/// Middleware: resolve and validate the caller's identity.
///
/// Use with `axum::middleware::from_fn_with_state(resolver, resolve_identity)`.
pub async fn resolve_identity(
    State(resolver): State<Arc<dyn IdentityResolver>>,
    mut request: Request,
    next: Next,
) -> Response {
    let resolved = resolver.resolve(request.headers()).await;

    let identity = match resolved {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            debug!("request carries no identity");
            return next.run(request).await;
        }
        Err(err) => {
            warn!("identity resolution failed: {err}");
            return reject(err).into_response();
        }
    };

    if let Err(err) = identity.validate() {
        warn!(
            subject = %identity.subject_id,
            role = %identity.role,
            "inconsistent identity rejected: {err}"
        );
        return TenancyAxumError::from(TenancyError::from(err)).into_response();
    }

    request.extensions_mut().insert(identity);
    next.run(request).await
}

fn reject(err: anyhow::Error) -> TenancyAxumError {
    if TenancyError::from_anyhow(&err).is_some() {
        return TenancyAxumError(err);
    }
    TenancyError::not_authenticated(err.to_string())
        .with_source(err)
        .into()
}
