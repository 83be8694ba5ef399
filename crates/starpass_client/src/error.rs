//! Error types for the client.

use starpass_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the transport, governor and page walker.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Network or HTTP failure, either not retryable or after retries ran out.
    #[error("transport error after {attempts} attempt(s): {message}")]
    Transport {
        /// Last HTTP status, `None` if no response was received.
        status: Option<u16>,
        /// Last response body (or network error text).
        body: String,
        /// Summary of the failure.
        message: String,
        /// Number of HTTP attempts made.
        attempts: u32,
    },

    /// Malformed response body or envelope.
    #[error("decode error: {0}")]
    Decode(String),

    /// The rate governor could not grant a permit in time.
    #[error("rate governor timed out after {waited:?}")]
    RateTimeout {
        /// Time spent waiting.
        waited: Duration,
    },

    /// Remote-side version mismatch (409/412).
    #[error("conflict (HTTP {status}): {body}")]
    Conflict {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The credential was rejected (401/403).
    #[error("credential rejected (HTTP {status})")]
    Unauthorized {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The calling thread already holds a governor permit.
    #[error("rate permit already held by this thread")]
    PermitAlreadyHeld,

    /// A request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Creates a transport error with no response.
    pub fn unreachable(message: impl Into<String>, attempts: u32) -> Self {
        let message = message.into();
        Self::Transport {
            status: None,
            body: message.clone(),
            message,
            attempts,
        }
    }

    /// Returns the HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Transport { status, .. } => *status,
            ClientError::Conflict { status, .. } | ClientError::Unauthorized { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Returns true if the failure is transient.
    ///
    /// The transport has already retried these by the time they surface; the
    /// flag tells callers whether a later attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { status, .. } => {
                status.map_or(true, |s| s == 429 || (500..600).contains(&s))
            }
            ClientError::RateTimeout { .. } => true,
            _ => false,
        }
    }

    /// Returns true if the failure means the session itself is unusable.
    pub fn is_run_level(&self) -> bool {
        matches!(
            self,
            ClientError::Unauthorized { .. }
                | ClientError::Config(_)
                | ClientError::Transport { status: None, .. }
        )
    }

    /// Returns true for a 404 response.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Validation(message) => ClientError::InvalidRequest(message),
            other => ClientError::Decode(other.to_string()),
        }
    }
}
