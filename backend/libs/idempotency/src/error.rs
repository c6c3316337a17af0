//! Error types for the idempotency barrier.

use thiserror::Error;

/// Result type for key-store operations.
pub type IdempotencyResult<T> = Result<T, IdempotencyError>;

/// Errors that can occur while looking up or recording cached responses.
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// Backing store call failed (network, throttling, missing table)
    #[error("Key store error: {0}")]
    Store(String),

    /// Cached response could not be encoded or decoded
    #[error("Cached response serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key validation failed (empty, too long)
    #[error("Invalid idempotency key: {0}")]
    InvalidKey(String),
}
