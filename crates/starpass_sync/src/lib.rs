//! # star_pass Sync
//!
//! Batch synchronization of local records against GalaxyDigital collections.
//!
//! This crate provides:
//! - `BatchSynchronizer`: push (create/update), pull (reconcile), delete and
//!   id lookup, dispatched over a bounded pool of worker threads
//! - `SyncReport`: ordered per-record outcomes with aggregate counts
//! - `CancellationToken`: run-scoped cancellation
//! - The run state machine (idle → probing → pushing/pulling → synced)
//!
//! ## Key Invariants
//!
//! - A completed run has exactly one outcome per input record
//! - Outcome order mirrors input order regardless of completion order
//! - Per-record failures are reported, never raised
//! - Only a failed session probe aborts a run

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod cancel;
mod config;
mod engine;
mod error;
mod report;
mod state;

pub use cancel::CancellationToken;
pub use config::SyncConfig;
pub use engine::{BatchSynchronizer, IdLookup, LookupResult, SyncStats};
pub use error::{SyncError, SyncResult};
pub use report::{ErrorKind, RecordOutcome, SyncCounts, SyncFailure, SyncOutcome, SyncReport};
pub use state::{Direction, SyncState};
