//! Error types for callsheet.

use thiserror::Error;

/// Result type alias using callsheet's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for callsheet storage and schema operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Non-SQL store transport failure (in-memory backend, injected faults)
    #[error("Store error: {0}")]
    Store(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Document not found in a collection
    #[error("Document not found: {collection}/{id}")]
    DocumentNotFound { collection: String, id: uuid::Uuid },

    /// Collection schema is malformed (cycle, duplicate collection)
    #[error("Schema error: {0}")]
    Schema(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
