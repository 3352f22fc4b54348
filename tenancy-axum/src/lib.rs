//! tenancy-axum: Axum adapter for tenancy-core.
//!
//! Installs two middlewares in front of an application's routes:
//! identity resolution (authentication seam, `401` on inconsistent
//! identities) and tenant context establishment (binds the request's
//! [`TenantContext`](tenancy_core::TenantContext) to the carrier for the
//! whole handler).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use axum::{routing::get, Router};
//! use tenancy_axum::{HeaderIdentityResolver, TenancyRouterExt};
//! use tenancy_core::TenancyApp;
//!
//! let app = TenancyApp::new();
//! let router: Router = Router::new()
//!     .route("/health", get(|| async { "ok" }))
//!     .with_tenancy(app, Arc::new(HeaderIdentityResolver::default()))
//!     .with_request_tracing();
//! ```

mod error;
pub mod identity;
pub mod middleware;
pub mod params;

pub use error::TenancyAxumError;
pub use identity::{resolve_identity, HeaderIdentityResolver, IdentityResolver};
pub use middleware::{apply_overrides, establish_tenant_context, CurrentTenant};
pub use params::OverrideParams;

use std::sync::Arc;

use axum::http::HeaderName;
use axum::Router;
use tenancy_core::TenancyApp;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub trait TenancyRouterExt {
    /// Resolve identity, then establish the tenant context, before every route.
    fn with_tenancy(self, app: TenancyApp, resolver: Arc<dyn IdentityResolver>) -> Self;

    /// Assign and echo `x-request-id`, and trace every request.
    fn with_request_tracing(self) -> Self;
}

impl<S> TenancyRouterExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_tenancy(self, app: TenancyApp, resolver: Arc<dyn IdentityResolver>) -> Self {
        // layers run outermost-last: identity resolution wraps context setup
        self.layer(axum::middleware::from_fn_with_state(
            app,
            establish_tenant_context,
        ))
        .layer(axum::middleware::from_fn_with_state(
            resolver,
            resolve_identity,
        ))
    }

    fn with_request_tracing(self) -> Self {
        let x_request_id = HeaderName::from_static("x-request-id");

        self.layer(PropagateRequestIdLayer::new(x_request_id.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
    }
}
