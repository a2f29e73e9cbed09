// Session store and session manager errors

use thiserror::Error;

/// Errors raised by either storage tier
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("record not found")]
    NotFound,
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(format!("redis: {err}"))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(format!("sqlite: {err}"))
    }
}

/// Errors raised by session lifecycle operations
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session has ended: {0}")]
    Ended(String),

    #[error("session owner has been revoked: {0}")]
    OwnerRevoked(String),

    /// The durable tier could not be reached. Authentication must fail closed.
    #[error("durable session store error: {0}")]
    Durable(#[from] StoreError),
}
