//! Configuration for the synchronizer.

use starpass_protocol::{ApiRequest, Method};

/// Configuration for sync runs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Worker threads dispatching record writes.
    pub workers: usize,
    /// Method used for updates of records with a remote id.
    pub update_method: Method,
    /// Fetch the remote record before an update and skip identical ones.
    pub compare_before_update: bool,
    /// Request sent before any record is processed. A failure aborts the run.
    pub probe: Option<ApiRequest>,
}

impl SyncConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            workers: 4,
            update_method: Method::Put,
            compare_before_update: true,
            probe: None,
        }
    }

    /// Sets the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the update method.
    pub fn with_update_method(mut self, method: Method) -> Self {
        self.update_method = method;
        self
    }

    /// Disables the read before each update.
    pub fn without_compare(mut self) -> Self {
        self.compare_before_update = false;
        self
    }

    /// Sets the session probe.
    pub fn with_probe(mut self, probe: ApiRequest) -> Self {
        self.probe = Some(probe);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
