//! Error types for the synchronizer.

use crate::state::SyncState;
use starpass_client::ClientError;
use starpass_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that stop a run as a whole.
///
/// Per-record failures never surface here; they are recorded in the
/// `SyncReport`.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transport failure outside any record.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Invalid field map or request.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The session probe failed; no record was processed.
    #[error("run aborted: {source}")]
    RunAborted {
        /// Probe failure.
        #[source]
        source: ClientError,
    },

    /// A run was started while another was active.
    #[error("cannot start a run from state {0:?}")]
    InvalidState(SyncState),
}

impl SyncError {
    /// Returns true if the error aborted a run before any record was processed.
    pub fn is_run_level(&self) -> bool {
        match self {
            SyncError::RunAborted { .. } => true,
            SyncError::Client(err) => err.is_run_level(),
            _ => false,
        }
    }
}
