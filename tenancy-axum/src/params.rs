use std::collections::HashMap;

use axum::http::HeaderMap;
use tenancy_core::config::TenancyConfigSnapshot;

/// Privileged scope overrides a request asked for.
///
/// Extraction never checks the caller's role; the context middleware decides
/// which of these, if any, to honor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideParams {
    pub account_id: Option<String>,
    pub entity_id: Option<String>,
}

impl OverrideParams {
    /// Read overrides from headers and query parameters. A header wins over
    /// a query parameter naming the same scope; blank values are ignored.
    pub fn from_parts(
        headers: &HeaderMap,
        query: &HashMap<String, String>,
        config: &TenancyConfigSnapshot,
    ) -> Self {
        Self {
            account_id: pick(
                headers,
                query,
                config.account_override_header(),
                config.account_override_query(),
            ),
            entity_id: pick(
                headers,
                query,
                config.entity_override_header(),
                config.entity_override_query(),
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.account_id.is_none() && self.entity_id.is_none()
    }
}

fn pick(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    header: &str,
    param: &str,
) -> Option<String> {
    let from_header = headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    from_header
        .or_else(|| query.get(param).map(|s| s.trim()).filter(|s| !s.is_empty()))
        .map(str::to_string)
}
