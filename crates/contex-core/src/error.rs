//! Error types for the Contex routing engine.

use thiserror::Error;

/// Result type alias using Contex's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Contex operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input; never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown project, agent, or event.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate registration with incompatible delivery configuration.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database operation failed (wraps sqlx::Error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Dependency momentarily unavailable; retried internally, then surfaced.
    #[error("Transient backend error: {0}")]
    TransientBackend(String),

    /// Schema/corruption class failure; not retried.
    #[error("Permanent backend error: {0}")]
    PermanentBackend(String),

    /// Embedding generation failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Search operation failed.
    #[error("Search error: {0}")]
    Search(String),

    /// Webhook delivery retry budget exhausted. Recorded, never surfaced to
    /// publishers (publishing is decoupled from delivery).
    #[error("Delivery failure: {0}")]
    Delivery(String),

    /// Deadline exceeded or client cancellation; propagated without partial
    /// commits.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network request failed.
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the operation that produced this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientBackend(_) | Error::Request(_))
    }

    /// HTTP status code this error maps to at the service boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::Cancelled(_) => 408,
            Error::TransientBackend(_) => 503,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
