//! Core domain errors.

use thiserror::Error;

/// Core domain errors for pipewatch.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A push-stream event carried a payload that could not be decoded.
    #[error("Invalid payload for '{event}' event: {reason}")]
    InvalidPayload { event: String, reason: String },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
