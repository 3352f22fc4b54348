use tenancy_core::errors::TenancyError;
use thiserror::Error;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The tenant context names no account, so no isolated key exists.
    #[error("Cannot {0} a reporting cache entry without an account scope")]
    Unscoped(&'static str),
}

impl From<CacheError> for TenancyError {
    fn from(err: CacheError) -> Self {
        TenancyError::forbidden(err.to_string())
    }
}
