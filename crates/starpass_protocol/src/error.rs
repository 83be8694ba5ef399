//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building requests or decoding responses.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),

    /// A local record failed checks before dispatch.
    #[error("validation failed: {0}")]
    Validation(String),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
