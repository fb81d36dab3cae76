//! Error types for catchup.

use std::time::Duration;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Feedback error: {0}")]
    Feedback(#[from] FeedbackError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Message source errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source {name} request failed: {reason}")]
    RequestFailed { name: String, reason: String },

    #[error("Source {name} API error: {reason}")]
    ApiError { name: String, reason: String },

    #[error("Authentication failed for source {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Rate limited on source {name}")]
    RateLimited { name: String },

    #[error("Invalid message payload: {0}")]
    InvalidPayload(String),
}

/// Analysis backend errors.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend {backend} request failed: {reason}")]
    RequestFailed { backend: String, reason: String },

    #[error("Backend {backend} rate limited, retry after {retry_after:?}")]
    RateLimited {
        backend: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {backend}: {reason}")]
    InvalidResponse { backend: String, reason: String },

    #[error("Backend {backend} timed out after {timeout:?}")]
    Timeout { backend: String, timeout: Duration },

    #[error("Authentication failed for backend {backend}")]
    AuthFailed { backend: String },
}

/// Validation errors for operations that resolve a todo in the latest
/// run. The pattern model is left untouched when any of these fire.
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("Rating {rating} out of range, expected 1..=5")]
    RatingOutOfRange { rating: u8 },

    #[error("No todo with id {id} in the latest run")]
    UnknownTodo { id: u32 },

    #[error("No archived run yet, run analyze first")]
    NoArchivedRun,
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
