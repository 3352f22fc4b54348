//! Cache key derivation.
//!
//! A key is `reporting:` followed by the hex SHA-256 of the canonical JSON
//! of `{account, entity, params}`. Canonical JSON sorts object keys at every
//! depth, so two parameter objects that differ only in key order hash the
//! same. Array order is kept; it is meaningful for sorts.
//!
//! `entity` is `null` for roles that span every entity of their account
//! (admin, operator), so their key does not vary with the entity.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tenancy_core::TenantContext;

use crate::error::{CacheError, CacheResult};

pub const KEY_PREFIX: &str = "reporting:";

/// Serialize `value` with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Entity component of the key, or `None` when the caller's view spans
/// entities.
pub(crate) fn entity_component(tenant: &TenantContext) -> Option<&str> {
    if tenant.spans_entities() {
        None
    } else {
        tenant.entity_id.as_deref()
    }
}

pub fn generate_cache_key(tenant: &TenantContext, params: &Value) -> CacheResult<String> {
    let account = tenant
        .account_id
        .as_deref()
        .ok_or(CacheError::Unscoped("derive a key for"))?;

    let scoped = serde_json::json!({
        "account": account,
        "entity": entity_component(tenant),
        "params": params,
    });

    let digest = Sha256::digest(canonical_json(&scoped).as_bytes());
    Ok(format!("{KEY_PREFIX}{}", hex::encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tenancy_core::Role;

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let a = json!({ "b": 1, "a": { "d": [2, 1], "c": null } });
        assert_eq!(canonical_json(&a), r#"{"a":{"c":null,"d":[2,1]},"b":1}"#);
    }

    #[test]
    fn key_ignores_parameter_order() {
        let tenant = TenantContext::member("A1", "E1", "u1");
        let one = json!({ "sort": { "createdAt": -1 }, "filter": { "status": "open", "kind": "bug" } });
        let two = json!({ "filter": { "kind": "bug", "status": "open" }, "sort": { "createdAt": -1 } });

        let k1 = generate_cache_key(&tenant, &one).unwrap();
        let k2 = generate_cache_key(&tenant, &two).unwrap();
        assert_eq!(k1, k2);
        assert!(k1.starts_with(KEY_PREFIX));
        assert_eq!(k1.len(), KEY_PREFIX.len() + 64);
    }

    #[test]
    fn member_key_varies_by_entity() {
        let params = json!({ "range": "30d" });
        let e1 = generate_cache_key(&TenantContext::member("A1", "E1", "u1"), &params).unwrap();
        let e2 = generate_cache_key(&TenantContext::member("A1", "E2", "u1"), &params).unwrap();
        assert_ne!(e1, e2);
    }

    #[test]
    fn admin_key_ignores_entity() {
        let params = json!({ "range": "30d" });
        let mut overridden = TenantContext::admin("A1", "u1");
        overridden.entity_id = Some("E7".to_string());

        let plain = generate_cache_key(&TenantContext::admin("A1", "u1"), &params).unwrap();
        let with_entity = generate_cache_key(&overridden, &params).unwrap();
        assert_eq!(plain, with_entity);
    }

    #[test]
    fn different_accounts_never_share_a_key() {
        let params = json!({ "range": "30d" });
        let a = generate_cache_key(&TenantContext::member("A1", "E1", "u1"), &params).unwrap();
        let b = generate_cache_key(&TenantContext::member("A2", "E1", "u1"), &params).unwrap();
        assert_ne!(a, b);

        // a role change that keeps the same ids still changes the key shape
        let viewer = TenantContext::member("A1", "E1", "u1").with_role(Role::Viewer);
        let admin = TenantContext::member("A1", "E1", "u1").with_role(Role::Admin);
        assert_ne!(
            generate_cache_key(&viewer, &params).unwrap(),
            generate_cache_key(&admin, &params).unwrap()
        );
    }

    #[test]
    fn unscoped_context_has_no_key() {
        let err = generate_cache_key(&TenantContext::operator("op"), &json!({})).unwrap_err();
        assert_eq!(err, CacheError::Unscoped("derive a key for"));
    }
}
