//! Error types for detector-link.

use thiserror::Error;

/// Errors that can occur while talking to the reactive backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// Missing or invalid client configuration (endpoint URL, runtime, args).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// HTTP transport failure.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Credentials rejected by the backend.
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// WebSocket transport or protocol failure.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// An operation exceeded its configured timeout.
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// The backend function itself reported an error.
    #[error("Query error: {0}")]
    QueryError(String),

    /// Non-success HTTP status from the backend.
    #[error("Server error ({status_code}): {message}")]
    ServerError { status_code: u16, message: String },

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The connection has been shut down.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LinkError::TimeoutError(err.to_string())
        } else if err.is_decode() {
            LinkError::SerializationError(err.to_string())
        } else {
            LinkError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::SerializationError(err.to_string())
    }
}

/// Result type for detector-link operations.
pub type Result<T> = std::result::Result<T, LinkError>;
