//! Error types for sliding quota enforcement.

use thiserror::Error;

/// Main error type for rate limiting operations.
///
/// A denied request is never an error: it is a [`Decision`](crate::ratelimit::Decision)
/// with `allowed == false`. These variants mean no decision could be made.
#[derive(Error, Debug)]
pub enum QuotaError {
    /// Invalid limit policy or service configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Empty or malformed identifier
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The shared store could not complete the operation
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuotaError {
    /// Whether this error means the outcome could not be determined because
    /// the store was unreachable, timed out, or failed mid-operation.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, QuotaError::StoreUnavailable(_))
    }
}

impl From<redis::RedisError> for QuotaError {
    fn from(err: redis::RedisError) -> Self {
        QuotaError::StoreUnavailable(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for QuotaError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        QuotaError::StoreUnavailable("store call timed out".to_string())
    }
}

/// Result type alias for rate limiting operations.
pub type Result<T> = std::result::Result<T, QuotaError>;
