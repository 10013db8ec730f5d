//! Error types for the pipeline client.

use thiserror::Error;

/// Errors that can occur when talking to the pipeline backend.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level HTTP failure (connect, TLS, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {path}: {body}")]
    Status {
        status: u16,
        path: String,
        body: String,
    },

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The configured base or stream URL is unusable.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The push stream broke or was closed.
    #[error("stream error: {0}")]
    Stream(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
