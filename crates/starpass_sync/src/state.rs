//! Synchronizer state machine.
//!
//! ```text
//! Idle ──▶ Probing ──▶ Pushing ──▶ Synced
//!             │    └─▶ Pulling ──▶ Synced
//!             ▼                 └─▶ Cancelled
//!           Error
//! ```

use serde::Serialize;
use std::fmt;

/// The current state of the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No run has started.
    Idle,
    /// Checking the session before touching records.
    Probing,
    /// Writing local records.
    Pushing,
    /// Reading remote records.
    Pulling,
    /// The last run completed.
    Synced,
    /// The last run aborted.
    Error,
    /// The last run was cancelled.
    Cancelled,
}

impl SyncState {
    /// Returns true while a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Probing | SyncState::Pushing | SyncState::Pulling
        )
    }

    /// Returns true if a new run may start.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

/// Direction of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Local records are written to the service.
    Push,
    /// Remote records are read and reconciled.
    Pull,
    /// Remote records are deleted by id.
    Delete,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Push => "push",
            Direction::Pull => "pull",
            Direction::Delete => "delete",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_states() {
        for state in [
            SyncState::Idle,
            SyncState::Synced,
            SyncState::Error,
            SyncState::Cancelled,
        ] {
            assert!(state.can_start_sync(), "{state:?}");
        }
        for state in [SyncState::Probing, SyncState::Pushing, SyncState::Pulling] {
            assert!(state.is_active());
            assert!(!state.can_start_sync(), "{state:?}");
        }
    }

    #[test]
    fn direction_names() {
        assert_eq!(Direction::Push.to_string(), "push");
        assert_eq!(serde_json::to_value(Direction::Pull).unwrap(), "pull");
    }
}
