//! Authenticated identity, as handed over by the authentication layer.
//!
//! The identity must satisfy the role-consistency rules of [`RolePolicy`]
//! before any tenant context is built from it. A violation is fatal for the
//! request: it is never softened into a narrower or wider scope.
//!
//! [`RolePolicy`]: crate::tenant::RolePolicy

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::TenancyError;
use crate::tenant::Role;

/// Result type for identity checks
pub type IdentityResult<T> = Result<T, IdentityError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Identity has an empty subject id")]
    MissingSubject,

    #[error("Role '{role}' requires an account id")]
    MissingAccount { role: Role },

    #[error("Role '{role}' requires an entity id")]
    MissingEntity { role: Role },

    #[error("Role '{role}' must not be bound to an account")]
    UnexpectedAccount { role: Role },

    #[error("Role '{role}' must not be bound to an entity")]
    UnexpectedEntity { role: Role },
}

impl From<IdentityError> for TenancyError {
    fn from(err: IdentityError) -> Self {
        TenancyError::not_authenticated(err.to_string())
    }
}

impl IdentityError {
    /// Wrap as a `NotAuthenticated` [`TenancyError`] inside `anyhow`.
    pub fn into_anyhow(self) -> anyhow::Error {
        TenancyError::from(self).into_anyhow()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub subject_id: String,
    pub role: Role,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
}

impl Identity {
    pub fn new(subject_id: impl Into<String>, role: Role) -> Self {
        Self {
            subject_id: subject_id.into(),
            role,
            account_id: None,
            entity_id: None,
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Check the identity against its role's policy.
    ///
    /// Blank ids count as absent.
    pub fn validate(&self) -> IdentityResult<()> {
        if self.subject_id.trim().is_empty() {
            return Err(IdentityError::MissingSubject);
        }

        let role = self.role;
        let policy = role.policy();
        let has_account = present(self.account_id.as_deref());
        let has_entity = present(self.entity_id.as_deref());

        if policy.requires_account && !has_account {
            return Err(IdentityError::MissingAccount { role });
        }
        if policy.forbids_account && has_account {
            return Err(IdentityError::UnexpectedAccount { role });
        }
        if policy.requires_entity && !has_entity {
            return Err(IdentityError::MissingEntity { role });
        }
        if policy.forbids_entity && has_entity {
            return Err(IdentityError::UnexpectedEntity { role });
        }

        Ok(())
    }
}

fn present(v: Option<&str>) -> bool {
    v.map(|s| !s.trim().is_empty()).unwrap_or(false)
}
