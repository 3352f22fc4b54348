//! Core multi-tenant types.
//!
//! A [`TenantContext`] describes who is calling: the account (tenant), the
//! entity (sub-organization) and the user, plus the caller's [`Role`]. It is
//! established once per request and read by every scoped data operation
//! through the [`carrier`](crate::carrier).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, IdentityError};
use crate::scope::ScopeDimension;

/// Caller role, ordered from the broadest privilege to the narrowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Cross-tenant staff. No account or entity association.
    Operator,
    /// Bound to one account, spans every entity in it.
    Admin,
    /// Bound to one account and one entity.
    Member,
    /// Bound to one account and one entity, read-mostly.
    Viewer,
}

/// What a role implies for identity shape and privileged overrides.
///
/// This table is the only place role-based branching lives; identity
/// validation, context establishment and cache-key derivation all read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePolicy {
    pub requires_account: bool,
    pub requires_entity: bool,
    pub forbids_account: bool,
    pub forbids_entity: bool,
    pub may_override_account: bool,
    pub may_override_entity: bool,
    /// Sees every entity of its account, so entity never narrows its view.
    pub spans_entities: bool,
}

const OPERATOR_POLICY: RolePolicy = RolePolicy {
    requires_account: false,
    requires_entity: false,
    forbids_account: true,
    forbids_entity: true,
    may_override_account: true,
    may_override_entity: true,
    spans_entities: true,
};

const ADMIN_POLICY: RolePolicy = RolePolicy {
    requires_account: true,
    requires_entity: false,
    forbids_account: false,
    forbids_entity: true,
    may_override_account: false,
    may_override_entity: true,
    spans_entities: true,
};

const ENTITY_BOUND_POLICY: RolePolicy = RolePolicy {
    requires_account: true,
    requires_entity: true,
    forbids_account: false,
    forbids_entity: false,
    may_override_account: false,
    may_override_entity: false,
    spans_entities: false,
};

impl Role {
    pub const ALL: [Role; 4] = [Role::Operator, Role::Admin, Role::Member, Role::Viewer];

    pub fn policy(self) -> &'static RolePolicy {
        match self {
            Role::Operator => &OPERATOR_POLICY,
            Role::Admin => &ADMIN_POLICY,
            Role::Member | Role::Viewer => &ENTITY_BOUND_POLICY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "operator" => Ok(Role::Operator),
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            "viewer" => Ok(Role::Viewer),
            other => Err(IdentityError::UnknownRole(other.to_string())),
        }
    }
}

/// Context carried with every scoped operation of a request.
///
/// Immutable once established, except for the privileged override path
/// ([`TenantContext::override_account`] / [`TenantContext::override_entity`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub account_id: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    /// `None` when the request carried no identity at all.
    pub role: Option<Role>,
    /// Operator user id when an operator is acting inside another account.
    pub impersonated_by: Option<String>,
}

impl TenantContext {
    /// Context for a request with no identity. Scope plugins pass through.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            account_id: identity.account_id.clone(),
            entity_id: identity.entity_id.clone(),
            user_id: Some(identity.subject_id.clone()),
            role: Some(identity.role),
            impersonated_by: None,
        }
    }

    /// Convenience constructor for a member bound to one account and entity.
    pub fn member<A, E, U>(account: A, entity: E, user: U) -> Self
    where
        A: Into<String>,
        E: Into<String>,
        U: Into<String>,
    {
        Self {
            account_id: Some(account.into()),
            entity_id: Some(entity.into()),
            user_id: Some(user.into()),
            role: Some(Role::Member),
            impersonated_by: None,
        }
    }

    pub fn admin<A, U>(account: A, user: U) -> Self
    where
        A: Into<String>,
        U: Into<String>,
    {
        Self {
            account_id: Some(account.into()),
            entity_id: None,
            user_id: Some(user.into()),
            role: Some(Role::Admin),
            impersonated_by: None,
        }
    }

    pub fn operator<U: Into<String>>(user: U) -> Self {
        Self {
            account_id: None,
            entity_id: None,
            user_id: Some(user.into()),
            role: Some(Role::Operator),
            impersonated_by: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Whether the caller's view spans every entity of its account.
    ///
    /// Anonymous callers are treated like the narrowest roles.
    pub fn spans_entities(&self) -> bool {
        self.role.map(|r| r.policy().spans_entities).unwrap_or(false)
    }

    /// The value a scope plugin for `dimension` filters by, if any.
    pub fn scope_value(&self, dimension: ScopeDimension) -> Option<&str> {
        match dimension {
            ScopeDimension::Account => self.account_id.as_deref(),
            ScopeDimension::Entity => self.entity_id.as_deref(),
            ScopeDimension::User => self.user_id.as_deref(),
        }
    }

    /// Operator-only account override.
    ///
    /// Returns `false` (and leaves the context untouched) for any other role.
    pub fn override_account(&mut self, account_id: impl Into<String>) -> bool {
        let Some(role) = self.role else {
            return false;
        };
        if !role.policy().may_override_account {
            return false;
        }

        self.account_id = Some(account_id.into());
        self.impersonated_by = self.user_id.clone();
        true
    }

    /// Operator/admin entity override.
    pub fn override_entity(&mut self, entity_id: impl Into<String>) -> bool {
        let Some(role) = self.role else {
            return false;
        };
        if !role.policy().may_override_entity {
            return false;
        }

        self.entity_id = Some(entity_id.into());
        true
    }

    /// Fill identity fields that are still absent, never overwriting present ones.
    pub fn amend_from(&mut self, identity: &Identity) {
        if self.role.is_none() {
            self.role = Some(identity.role);
        }
        if self.user_id.is_none() {
            self.user_id = Some(identity.subject_id.clone());
        }
        if self.account_id.is_none() {
            self.account_id = identity.account_id.clone();
        }
        if self.entity_id.is_none() {
            self.entity_id = identity.entity_id.clone();
        }
    }
}
