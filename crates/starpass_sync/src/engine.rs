//! Batch synchronizer.

use crate::cancel::CancellationToken;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::report::{ErrorKind, ReportBuilder, SyncFailure, SyncOutcome, SyncReport};
use crate::state::{Direction, SyncState};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use starpass_client::{HttpClient, Transport};
use starpass_protocol::{ApiRequest, ApiResponse, FieldMap, LocalRecord, RemoteId, RemoteRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Statistics across runs.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs that returned a report.
    pub runs_completed: u64,
    /// Runs aborted by the session probe.
    pub runs_aborted: u64,
    /// Records created, updated or deleted.
    pub records_written: u64,
    /// Records read by pull runs.
    pub records_pulled: u64,
    /// Id of the last completed run.
    pub last_run_id: Option<Uuid>,
    /// Last run-level error message.
    pub last_error: Option<String>,
}

/// Result of looking up one id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// A matching record exists.
    Found(RemoteId),
    /// No record matched.
    NotFound,
    /// The lookup request failed.
    Failed(SyncFailure),
    /// The run was cancelled before the lookup.
    Cancelled,
}

/// Lookup of a remote id by a filter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdLookup {
    /// Filter value, e.g. an email address.
    pub value: String,
    /// What the lookup found.
    pub result: LookupResult,
}

impl IdLookup {
    /// Returns the id, if one was found.
    pub fn remote_id(&self) -> Option<&RemoteId> {
        match &self.result {
            LookupResult::Found(id) => Some(id),
            _ => None,
        }
    }
}

/// Reconciles local records against a remote collection.
///
/// Every request goes through the transport, and so through its shared
/// rate governor. One run at a time: `sync`, `push`, `pull` and `delete`
/// fail with `SyncError::InvalidState` while another run is active.
pub struct BatchSynchronizer<C: HttpClient> {
    transport: Transport<C>,
    config: SyncConfig,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl<C: HttpClient> BatchSynchronizer<C> {
    /// Creates a synchronizer.
    pub fn new(transport: Transport<C>, config: SyncConfig) -> Self {
        Self {
            transport,
            config,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Transport<C> {
        &self.transport
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Runs a synchronization in the given direction.
    ///
    /// Push writes `records`; pull reconciles the remote collection against
    /// them; delete removes the remote record behind each of them.
    pub fn sync(
        &self,
        records: &[LocalRecord],
        direction: Direction,
        map: &FieldMap,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        match direction {
            Direction::Push => self.push(records, map, cancel),
            Direction::Pull => self.pull(map, &[], records, cancel),
            Direction::Delete => {
                let targets = records
                    .iter()
                    .map(|record| -> Result<(RemoteId, String), SyncFailure> {
                        let id = record.remote_id.clone().ok_or_else(|| {
                            SyncFailure::new(ErrorKind::Validation, "record has no remote id")
                        })?;
                        let path = map.item_path(record, &id)?;
                        Ok((id, path))
                    })
                    .collect();
                self.run_deletes(map.collection(), targets, cancel)
            }
        }
    }

    /// Creates or updates each record.
    ///
    /// Records with a remote id are updated, others created. When
    /// `compare_before_update` is set, records whose remote copy already
    /// matches are skipped without a write.
    pub fn push(
        &self,
        records: &[LocalRecord],
        map: &FieldMap,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%run_id, records = records.len(), collection = map.collection(), "starting push");
        self.begin(SyncState::Pushing)?;

        let builder = ReportBuilder::new(run_id, Direction::Push, records.len());
        self.dispatch(records.len(), cancel, |index| {
            let record = &records[index];
            let outcome = match self.write(record, map) {
                Ok(outcome) => outcome,
                Err(failure) => {
                    warn!(%run_id, index, %failure, "record failed");
                    (record.remote_id.clone(), SyncOutcome::Failed(failure))
                }
            };
            builder.record(index, outcome.0, outcome.1);
        });

        Ok(self.finish(builder, started, cancel))
    }

    /// Reads the remote collection and reconciles it against `local`.
    ///
    /// Each pulled record yields one outcome: `created` if no local record
    /// carries its id, `skipped` if the local fields already match, otherwise
    /// `updated`. A page failure ends the walk with one `failed` outcome.
    pub fn pull(
        &self,
        map: &FieldMap,
        filters: &[(String, String)],
        local: &[LocalRecord],
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        let path = map.collection_path(&LocalRecord::default())?;
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%run_id, collection = %path, "starting pull");
        self.begin(SyncState::Pulling)?;

        let known: HashMap<&RemoteId, &LocalRecord> = local
            .iter()
            .filter_map(|record| record.remote_id.as_ref().map(|id| (id, record)))
            .collect();
        let builder = ReportBuilder::new(run_id, Direction::Pull, 0);
        let mut pages = self
            .transport
            .pages(&path, filters.iter().map(|(k, v)| (k, v)));

        while !cancel.is_cancelled() {
            let Some(page) = pages.next() else {
                break;
            };
            match page {
                Ok(page) => {
                    debug!(%run_id, records = page.records.len(), "pulled page");
                    for remote in &page.records {
                        let outcome = match known.get(&remote.id) {
                            Some(record) if map.matches_remote(&map.outbound(record), remote) => {
                                SyncOutcome::Skipped
                            }
                            Some(_) => SyncOutcome::Updated,
                            None => SyncOutcome::Created,
                        };
                        builder.append(Some(remote.id.clone()), outcome);
                        builder.add_pulled(map.inbound(remote));
                    }
                }
                Err(err) => {
                    warn!(%run_id, error = %err, "pull aborted");
                    builder.append(None, SyncOutcome::Failed(SyncFailure::from(&err)));
                    break;
                }
            }
        }

        Ok(self.finish(builder, started, cancel))
    }

    /// Lazily reads the remote collection in the local representation.
    ///
    /// Pages are fetched as the iterator advances. This does not change the
    /// synchronizer state.
    pub fn pull_stream<'a>(
        &'a self,
        map: &'a FieldMap,
        filters: &[(String, String)],
    ) -> SyncResult<impl Iterator<Item = SyncResult<LocalRecord>> + 'a> {
        let path = map.collection_path(&LocalRecord::default())?;
        let pages = self
            .transport
            .pages(&path, filters.iter().map(|(k, v)| (k, v)));
        Ok(pages.flat_map(move |page| match page {
            Ok(page) => page
                .records
                .iter()
                .map(|remote| Ok(map.inbound(remote)))
                .collect::<Vec<_>>(),
            Err(err) => vec![Err(SyncError::from(err))],
        }))
    }

    /// Looks up remote ids by a filter field, e.g. users by `user_email`.
    ///
    /// Sends `GET {collection}?{filter_field}={value}` per value and takes the
    /// first record returned. A 404 or an empty result means not found.
    pub fn lookup_ids(
        &self,
        collection: &str,
        filter_field: &str,
        values: &[String],
        cancel: &CancellationToken,
    ) -> Vec<IdLookup> {
        let slots: Mutex<Vec<Option<LookupResult>>> = Mutex::new(vec![None; values.len()]);
        self.dispatch(values.len(), cancel, |index| {
            let request = ApiRequest::get(collection).with_query(filter_field, values[index].clone());
            let result = match self.transport.send_json(&request) {
                Ok(body) => match first_id(&body) {
                    Some(id) => LookupResult::Found(id),
                    None => LookupResult::NotFound,
                },
                Err(err) if err.is_not_found() => LookupResult::NotFound,
                Err(err) => {
                    warn!(value = %values[index], error = %err, "lookup failed");
                    LookupResult::Failed(SyncFailure::from(&err))
                }
            };
            slots.lock()[index] = Some(result);
        });

        values
            .iter()
            .zip(slots.into_inner())
            .map(|(value, result)| IdLookup {
                value: value.clone(),
                result: result.unwrap_or(LookupResult::Cancelled),
            })
            .collect()
    }

    /// Deletes records by id. A 404 yields `skipped`.
    pub fn delete(
        &self,
        collection: &str,
        ids: &[RemoteId],
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        let base = collection.trim_end_matches('/');
        let targets = ids
            .iter()
            .map(|id| Ok::<_, SyncFailure>((id.clone(), format!("{base}/{id}"))))
            .collect();
        self.run_deletes(collection, targets, cancel)
    }

    /// Builds the request each record would be written with, without sending.
    ///
    /// Updates are planned without the preceding read, so a record that
    /// would be skipped still shows its update request.
    pub fn plan(&self, records: &[LocalRecord], map: &FieldMap) -> Vec<Result<ApiRequest, SyncFailure>> {
        records
            .iter()
            .map(|record| -> Result<ApiRequest, SyncFailure> {
                map.validate(record)?;
                self.write_request(record, map)
            })
            .collect()
    }

    fn run_deletes(
        &self,
        collection: &str,
        targets: Vec<Result<(RemoteId, String), SyncFailure>>,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%run_id, records = targets.len(), collection, "starting delete");
        self.begin(SyncState::Pushing)?;

        let builder = ReportBuilder::new(run_id, Direction::Delete, targets.len());
        self.dispatch(targets.len(), cancel, |index| {
            let (id, path) = match &targets[index] {
                Ok(target) => target,
                Err(failure) => {
                    builder.record(index, None, SyncOutcome::Failed(failure.clone()));
                    return;
                }
            };
            let outcome = match self.transport.send(&ApiRequest::delete(path.as_str())) {
                Ok(_) => SyncOutcome::Deleted,
                Err(err) if err.is_not_found() => SyncOutcome::Skipped,
                Err(err) => {
                    warn!(%run_id, %id, error = %err, "delete failed");
                    SyncOutcome::Failed(SyncFailure::from(&err))
                }
            };
            builder.record(index, Some(id.clone()), outcome);
        });

        Ok(self.finish(builder, started, cancel))
    }

    /// Writes one record and returns the id involved with the outcome.
    fn write(
        &self,
        record: &LocalRecord,
        map: &FieldMap,
    ) -> Result<(Option<RemoteId>, SyncOutcome), SyncFailure> {
        map.validate(record)?;
        let request = self.write_request(record, map)?;

        match &record.remote_id {
            Some(id) => {
                if self.config.compare_before_update {
                    let current = self.fetch_record(&request.path)?;
                    if map.matches_remote(&map.outbound(record), &current) {
                        debug!(%id, "remote record already matches");
                        return Ok((Some(id.clone()), SyncOutcome::Skipped));
                    }
                }
                self.transport.send(&request)?;
                Ok((Some(id.clone()), SyncOutcome::Updated))
            }
            None => {
                let response = self.transport.send(&request)?;
                Ok((created_id(&response), SyncOutcome::Created))
            }
        }
    }

    fn write_request(&self, record: &LocalRecord, map: &FieldMap) -> Result<ApiRequest, SyncFailure> {
        let body = Value::Object(map.outbound(record));
        Ok(match &record.remote_id {
            Some(id) => ApiRequest::new(self.config.update_method, map.item_path(record, id)?)
                .with_body(body),
            None => ApiRequest::post(map.collection_path(record)?, body),
        })
    }

    fn fetch_record(&self, path: &str) -> Result<RemoteRecord, SyncFailure> {
        let body = self.transport.send_json(&ApiRequest::get(path))?;
        let value = match body {
            Value::Object(mut envelope) if envelope.get("data").is_some_and(Value::is_object) => {
                envelope.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        };
        Ok(RemoteRecord::from_value(value)?)
    }

    /// Runs `work` for indices `0..len` on up to `workers` threads.
    ///
    /// Indices are taken in order. Once `cancel` fires no new index is
    /// started.
    fn dispatch<F>(&self, len: usize, cancel: &CancellationToken, work: F)
    where
        F: Fn(usize) + Sync,
    {
        let next = AtomicUsize::new(0);
        let workers = self.config.workers.clamp(1, len.max(1));
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= len {
                        break;
                    }
                    work(index);
                });
            }
        });
    }

    fn begin(&self, active: SyncState) -> SyncResult<()> {
        {
            let mut state = self.state.write();
            if !state.can_start_sync() {
                return Err(SyncError::InvalidState(*state));
            }
            *state = SyncState::Probing;
        }

        if let Some(probe) = &self.config.probe {
            if let Err(source) = self.transport.send(probe) {
                error!(%probe, error = %source, "session probe failed, aborting run");
                self.set_state(SyncState::Error);
                let mut stats = self.stats.write();
                stats.runs_aborted += 1;
                stats.last_error = Some(source.to_string());
                return Err(SyncError::RunAborted { source });
            }
        }

        self.set_state(active);
        Ok(())
    }

    fn finish(&self, builder: ReportBuilder, started: Instant, cancel: &CancellationToken) -> SyncReport {
        let report = builder.finish(started.elapsed());
        let counts = report.counts();

        if cancel.is_cancelled() {
            warn!(run_id = %report.run_id(), cancelled = counts.cancelled, "run cancelled");
            self.set_state(SyncState::Cancelled);
        } else {
            self.set_state(SyncState::Synced);
        }

        {
            let mut stats = self.stats.write();
            stats.runs_completed += 1;
            stats.records_written += (counts.created + counts.updated + counts.deleted) as u64;
            stats.records_pulled += report.pulled().len() as u64;
            stats.last_run_id = Some(report.run_id());
            stats.last_error = None;
        }

        info!(
            run_id = %report.run_id(),
            direction = %report.direction(),
            %counts,
            elapsed_ms = report.elapsed().as_millis() as u64,
            "run finished"
        );
        report
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }
}

/// Reads the id of a created record from a create response.
fn created_id(response: &ApiResponse) -> Option<RemoteId> {
    let body = response.json_value().ok()?;
    body.pointer("/data/id")
        .or_else(|| body.get("id"))
        .and_then(RemoteId::from_value)
}

/// Reads the id of the first record in a list or single-record envelope.
fn first_id(body: &Value) -> Option<RemoteId> {
    let data = body.get("data")?;
    let record = match data {
        Value::Array(items) => items.first()?,
        other => other,
    };
    record.get("id").and_then(RemoteId::from_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use starpass_client::{ClientConfig, Credential, ManualClock, MockHttpClient, RetryConfig};
    use std::sync::Arc;

    fn synchronizer(client: MockHttpClient, config: SyncConfig) -> BatchSynchronizer<MockHttpClient> {
        let client_config =
            ClientConfig::new("https://api.example.org", Credential::new("t").unwrap())
                .with_retry(RetryConfig::new(3).without_jitter());
        let transport = Transport::new(client_config, client).with_clock(Arc::new(ManualClock::new()));
        BatchSynchronizer::new(transport, config)
    }

    fn user(name: &str) -> LocalRecord {
        LocalRecord::default().with_field("name", name)
    }

    #[test]
    fn plan_builds_create_and_update_requests() {
        let sync = synchronizer(MockHttpClient::new(), SyncConfig::default());
        let map = FieldMap::new("/needs/{need_id}/shifts").require("need_id");
        let records = vec![
            LocalRecord::default()
                .with_field("need_id", "4")
                .with_field("shifts", json!([{"start": "2023-05-01 09:00"}])),
            LocalRecord::default().with_field("need_id", "5").with_remote_id("77"),
            LocalRecord::default(),
        ];

        let planned = sync.plan(&records, &map);
        let create = planned[0].as_ref().unwrap();
        assert_eq!(create.to_string(), "POST /needs/4/shifts");
        assert_eq!(create.body, Some(json!({"shifts": [{"start": "2023-05-01 09:00"}]})));
        assert_eq!(planned[1].as_ref().unwrap().to_string(), "PUT /needs/5/shifts/77");
        assert_eq!(planned[2].as_ref().unwrap_err().kind, ErrorKind::Validation);
        assert_eq!(sync.transport().client().request_count(), 0);
    }

    #[test]
    fn created_ids_are_read_from_envelope() {
        let response = ApiResponse::json(201, &json!({"data": {"id": 42}}));
        assert_eq!(created_id(&response), Some("42".into()));
        let response = ApiResponse::json(201, &json!({"id": "a1"}));
        assert_eq!(created_id(&response), Some("a1".into()));
        assert_eq!(created_id(&ApiResponse::new(204, "")), None);
    }

    #[test]
    fn first_id_of_list() {
        assert_eq!(first_id(&json!({"data": [{"id": 3}, {"id": 4}]})), Some("3".into()));
        assert_eq!(first_id(&json!({"data": []})), None);
        assert_eq!(first_id(&json!({"data": {"id": 9}})), Some("9".into()));
    }

    #[test]
    fn probe_failure_aborts_before_records() {
        let client = MockHttpClient::new();
        client.push_response(ApiResponse::new(401, "invalid token"));
        let sync = synchronizer(
            client,
            SyncConfig::default().with_probe(ApiRequest::get("/users").with_query("per_page", "1")),
        );

        let err = sync
            .push(&[user("a"), user("b")], &FieldMap::new("/users"), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, SyncError::RunAborted { .. }));
        assert_eq!(sync.state(), SyncState::Error);
        assert_eq!(sync.transport().client().request_count(), 1);
        assert_eq!(sync.stats().runs_aborted, 1);
    }

    #[test]
    fn cancelled_before_start_marks_every_record() {
        let sync = synchronizer(MockHttpClient::new(), SyncConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = sync
            .push(&[user("a"), user("b"), user("c")], &FieldMap::new("/users"), &cancel)
            .unwrap();
        assert_eq!(report.counts().cancelled, 3);
        assert_eq!(sync.state(), SyncState::Cancelled);
        assert_eq!(sync.transport().client().request_count(), 0);
    }

    #[test]
    fn update_skips_matching_remote() {
        let client = MockHttpClient::new();
        client
            .push_json(200, json!({"data": {"id": 5, "name": "Ada", "age": 36}}))
            .push_json(200, json!({"data": {"id": 6, "name": "Bob"}}))
            .push_json(200, json!({"data": {"id": 6, "name": "Robert"}}));
        let sync = synchronizer(client, SyncConfig::default().with_workers(1));

        let records = vec![
            user("Ada").with_field("age", "36").with_remote_id("5"),
            user("Robert").with_remote_id("6"),
        ];
        let report = sync
            .push(&records, &FieldMap::new("/users"), &CancellationToken::new())
            .unwrap();

        assert_eq!(report.outcomes()[0].outcome, SyncOutcome::Skipped);
        assert_eq!(report.outcomes()[1].outcome, SyncOutcome::Updated);
        let methods: Vec<_> = sync
            .transport()
            .client()
            .requests()
            .iter()
            .map(|r| r.method.to_string())
            .collect();
        assert_eq!(methods, vec!["GET", "GET", "PUT"]);
    }

    #[test]
    fn second_run_while_active_is_rejected() {
        let sync = synchronizer(MockHttpClient::new(), SyncConfig::default());
        sync.set_state(SyncState::Pushing);
        assert!(matches!(
            sync.push(&[], &FieldMap::new("/users"), &CancellationToken::new()),
            Err(SyncError::InvalidState(SyncState::Pushing))
        ));
    }
}
