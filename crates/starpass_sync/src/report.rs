//! Sync reports.

use crate::state::Direction;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use starpass_client::ClientError;
use starpass_protocol::{LocalRecord, ProtocolError, RemoteId};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Classification of a per-record failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network or HTTP failure.
    Transport,
    /// Malformed response.
    Decode,
    /// No rate permit within the timeout.
    RateTimeout,
    /// Remote-side version mismatch.
    Conflict,
    /// The local record failed checks before dispatch.
    Validation,
}

impl From<&ClientError> for ErrorKind {
    fn from(err: &ClientError) -> Self {
        match err {
            ClientError::Decode(_) => ErrorKind::Decode,
            ClientError::RateTimeout { .. } => ErrorKind::RateTimeout,
            ClientError::Conflict { .. } => ErrorKind::Conflict,
            ClientError::InvalidRequest(_) => ErrorKind::Validation,
            ClientError::Transport { .. }
            | ClientError::Unauthorized { .. }
            | ClientError::PermitAlreadyHeld
            | ClientError::Config(_) => ErrorKind::Transport,
        }
    }
}

/// Why a record failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    /// Failure class.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// HTTP status, if a response was received.
    #[serde(rename = "http_status", skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl SyncFailure {
    /// Creates a failure without a status.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }
}

impl From<&ClientError> for SyncFailure {
    fn from(err: &ClientError) -> Self {
        Self {
            kind: err.into(),
            message: err.to_string(),
            status: err.status(),
        }
    }
}

impl From<ClientError> for SyncFailure {
    fn from(err: ClientError) -> Self {
        Self::from(&err)
    }
}

impl From<ProtocolError> for SyncFailure {
    fn from(err: ProtocolError) -> Self {
        let kind = match err {
            ProtocolError::Validation(_) => ErrorKind::Validation,
            _ => ErrorKind::Decode,
        };
        Self::new(kind, err.to_string())
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// A new remote record was created.
    Created,
    /// An existing remote record was changed.
    Updated,
    /// Nothing to do; the remote record already matched.
    Skipped,
    /// The remote record was deleted.
    Deleted,
    /// The record could not be synchronized.
    Failed(SyncFailure),
    /// The run was cancelled before the record was processed.
    Cancelled,
}

impl SyncOutcome {
    /// Returns the failure, if any.
    pub fn failure(&self) -> Option<&SyncFailure> {
        match self {
            SyncOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Outcome of one record, tied to its position in the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    /// Input index for push and delete runs; pull order for pull runs.
    pub index: usize,
    /// Remote id involved, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,
    /// The outcome.
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// Aggregate outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    /// Records created.
    pub created: usize,
    /// Records updated.
    pub updated: usize,
    /// Records skipped.
    pub skipped: usize,
    /// Records deleted.
    pub deleted: usize,
    /// Records failed.
    pub failed: usize,
    /// Records not processed because of cancellation.
    pub cancelled: usize,
}

impl SyncCounts {
    fn add(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Skipped => self.skipped += 1,
            SyncOutcome::Deleted => self.deleted += 1,
            SyncOutcome::Failed(_) => self.failed += 1,
            SyncOutcome::Cancelled => self.cancelled += 1,
        }
    }

    /// Returns the number of outcomes counted.
    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.deleted + self.failed + self.cancelled
    }
}

impl fmt::Display for SyncCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created {}, updated {}, skipped {}, deleted {}, failed {}, cancelled {}",
            self.created, self.updated, self.skipped, self.deleted, self.failed, self.cancelled
        )
    }
}

/// Result of a sync run.
///
/// Immutable once returned. Outcomes are ordered by input index.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    run_id: Uuid,
    direction: Direction,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    elapsed: Duration,
    counts: SyncCounts,
    outcomes: Vec<RecordOutcome>,
    #[serde(skip)]
    pulled: Vec<LocalRecord>,
}

impl SyncReport {
    /// Returns the run id.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the run direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns the run duration.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Returns the aggregate counts.
    pub fn counts(&self) -> SyncCounts {
        self.counts
    }

    /// Returns the outcomes in order.
    pub fn outcomes(&self) -> &[RecordOutcome] {
        &self.outcomes
    }

    /// Returns the records read by a pull run, mapped to the local form.
    pub fn pulled(&self) -> &[LocalRecord] {
        &self.pulled
    }

    /// Returns the failed outcomes.
    pub fn failures(&self) -> impl Iterator<Item = (&RecordOutcome, &SyncFailure)> {
        self.outcomes
            .iter()
            .filter_map(|entry| entry.outcome.failure().map(|failure| (entry, failure)))
    }

    /// Returns true if no outcome failed or was cancelled.
    pub fn is_clean(&self) -> bool {
        self.counts.failed == 0 && self.counts.cancelled == 0
    }

    /// Copies remote ids of created records back onto the pushed input.
    ///
    /// `records` must be the slice the run was started with. Returns the
    /// number of ids assigned.
    pub fn assign_remote_ids(&self, records: &mut [LocalRecord]) -> usize {
        let mut assigned = 0;
        for entry in &self.outcomes {
            if entry.outcome != SyncOutcome::Created {
                continue;
            }
            if let (Some(id), Some(record)) = (&entry.remote_id, records.get_mut(entry.index)) {
                if record.remote_id.is_none() {
                    record.remote_id = Some(id.clone());
                    assigned += 1;
                }
            }
        }
        assigned
    }

    /// Returns a one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{} run {}: {} in {:.2}s",
            self.direction,
            self.run_id,
            self.counts,
            self.elapsed.as_secs_f64()
        )
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Slot-per-record accumulator shared by workers during a run.
///
/// Each outcome lands in the slot of its input index, so the final order
/// never depends on completion order. Slots left empty become `Cancelled`.
#[derive(Debug)]
pub(crate) struct ReportBuilder {
    run_id: Uuid,
    direction: Direction,
    slots: Mutex<Vec<Option<(Option<RemoteId>, SyncOutcome)>>>,
    pulled: Mutex<Vec<LocalRecord>>,
}

impl ReportBuilder {
    pub(crate) fn new(run_id: Uuid, direction: Direction, len: usize) -> Self {
        Self {
            run_id,
            direction,
            slots: Mutex::new(vec![None; len]),
            pulled: Mutex::new(Vec::new()),
        }
    }

    /// Stores the outcome of input `index`.
    pub(crate) fn record(&self, index: usize, remote_id: Option<RemoteId>, outcome: SyncOutcome) {
        let mut slots = self.slots.lock();
        if index >= slots.len() {
            slots.resize(index + 1, None);
        }
        slots[index] = Some((remote_id, outcome));
    }

    /// Appends an outcome after the current last slot.
    pub(crate) fn append(&self, remote_id: Option<RemoteId>, outcome: SyncOutcome) {
        self.slots.lock().push(Some((remote_id, outcome)));
    }

    pub(crate) fn add_pulled(&self, record: LocalRecord) {
        self.pulled.lock().push(record);
    }

    pub(crate) fn finish(self, elapsed: Duration) -> SyncReport {
        let mut counts = SyncCounts::default();
        let outcomes: Vec<RecordOutcome> = self
            .slots
            .into_inner()
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                let (remote_id, outcome) = slot.unwrap_or((None, SyncOutcome::Cancelled));
                counts.add(&outcome);
                RecordOutcome {
                    index,
                    remote_id,
                    outcome,
                }
            })
            .collect();

        SyncReport {
            run_id: self.run_id,
            direction: self.direction,
            elapsed,
            counts,
            outcomes,
            pulled: self.pulled.into_inner(),
        }
    }
}
