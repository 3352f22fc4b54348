//! # Errors
//!
//! Scoped operations fail in a handful of known ways: an identity that does
//! not fit its role, a write that cannot be bound to the caller, a record
//! outside the caller's scope, a missing required scoping column. Each is a
//! [`TenancyError`] carried inside `anyhow::Error`, so it crosses the hook
//! pipeline untouched and a transport adapter finds it again with
//! [`TenancyError::from_anyhow`].
//!
//! The JSON shape is Feathers-style: `{name, message, code, className,
//! errors?}`.

use std::fmt;

use anyhow::Error as AnyError;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Identity missing or inconsistent with its role.
    NotAuthenticated,
    /// A write could not be bound to the caller's tenant.
    Forbidden,
    /// Unknown collection, or a record outside the caller's scope.
    NotFound,
    /// A required scoping column is still unset.
    Unprocessable,
    GeneralError,
    /// The store does not support the requested method.
    NotImplemented,
}

impl ErrorKind {
    /// `(status, name, className)`.
    const fn parts(self) -> (u16, &'static str, &'static str) {
        match self {
            ErrorKind::NotAuthenticated => (401, "NotAuthenticated", "not-authenticated"),
            ErrorKind::Forbidden => (403, "Forbidden", "forbidden"),
            ErrorKind::NotFound => (404, "NotFound", "not-found"),
            ErrorKind::Unprocessable => (422, "Unprocessable", "unprocessable"),
            ErrorKind::GeneralError => (500, "GeneralError", "general-error"),
            ErrorKind::NotImplemented => (501, "NotImplemented", "not-implemented"),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.parts().0
    }

    pub fn name(&self) -> &'static str {
        self.parts().1
    }

    pub fn class_name(&self) -> &'static str {
        self.parts().2
    }
}

#[derive(Debug)]
pub struct TenancyError {
    pub kind: ErrorKind,
    pub message: String,
    /// Per-field messages, e.g. `{"account_id": ["is required"]}`.
    pub errors: Option<Value>,
    pub source: Option<AnyError>,
}

impl TenancyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            errors: None,
            source: None,
        }
    }

    pub fn with_errors(mut self, errors: Value) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    /// First `TenancyError` in an `anyhow` chain.
    pub fn from_anyhow(err: &AnyError) -> Option<&TenancyError> {
        err.chain().find_map(|e| e.downcast_ref::<TenancyError>())
    }

    /// Copy without the source chain, for returning to clients.
    pub fn sanitize_for_client(&self) -> TenancyError {
        TenancyError {
            kind: self.kind,
            message: self.message.clone(),
            errors: self.errors.clone(),
            source: None,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "name": self.name(),
            "message": self.message,
            "code": self.code(),
            "className": self.kind.class_name(),
        });
        if let Some(errors) = &self.errors {
            body["errors"] = errors.clone();
        }
        body
    }

    pub fn not_authenticated(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAuthenticated, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unprocessable, msg)
    }

    pub fn general_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeneralError, msg)
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented, msg)
    }
}

impl fmt::Display for TenancyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.code(), self.message)
    }
}

impl std::error::Error for TenancyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Return early with a `TenancyError` built by one of its constructors.
#[macro_export]
macro_rules! bail_tenancy {
    ($ctor:ident, $msg:expr) => {
        return Err($crate::errors::TenancyError::$ctor($msg).into_anyhow())
    };
    ($ctor:ident, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::errors::TenancyError::$ctor(format!($fmt, $($arg)*)).into_anyhow())
    };
}
