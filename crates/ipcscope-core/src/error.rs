//! Error types for `ipcscope` core library.

use thiserror::Error;

/// Result type alias using `ipcscope` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `ipcscope` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A line could not be decoded as a structured record
    #[error("Failed to decode record: {0}")]
    Decode(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown category name
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
