//! Sync runs against the in-memory service.

use proptest::prelude::*;
use serde_json::json;
use starpass_client::{HttpClient, HttpRequest, NetworkError, RateLimitConfig, Transport};
use starpass_protocol::shifts::ShiftLayout;
use starpass_protocol::{
    plan_shift_batches, ApiResponse, BodySchema, FieldMap, LocalRecord, Method, RemoteId,
};
use starpass_sync::{
    BatchSynchronizer, CancellationToken, Direction, ErrorKind, LookupResult, SyncConfig,
    SyncError, SyncOutcome, SyncState,
};
use starpass_testkit::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn synchronizer(fake: Arc<FakeGalaxy>, workers: usize) -> BatchSynchronizer<Arc<FakeGalaxy>> {
    let (_clock, transport) = manual_transport(fake);
    BatchSynchronizer::new(transport, SyncConfig::default().with_workers(workers))
}

fn users_map() -> FieldMap {
    FieldMap::new("/users").require("email")
}

fn outcomes(report: &starpass_sync::SyncReport) -> Vec<SyncOutcome> {
    report.outcomes().iter().map(|o| o.outcome.clone()).collect()
}

#[test]
fn push_creates_new_records() {
    let fake = Arc::new(FakeGalaxy::new());
    let sync = synchronizer(fake.clone(), 4);
    let mut records = users(3);

    let report = sync
        .sync(&records, Direction::Push, &users_map(), &CancellationToken::new())
        .unwrap();

    assert_eq!(report.counts().created, 3);
    assert_eq!(report.counts().failed, 0);
    assert_eq!(report.outcomes().len(), 3);
    assert_eq!(fake.records("/users").len(), 3);
    assert_eq!(report.assign_remote_ids(&mut records), 3);
    assert!(records.iter().all(|r| r.remote_id.is_some()));
    assert_eq!(sync.state(), SyncState::Synced);
}

#[test]
fn second_push_of_unchanged_records_skips_everything() {
    let fake = Arc::new(FakeGalaxy::new());
    let sync = synchronizer(fake.clone(), 2);
    let mut records = users(4);
    let cancel = CancellationToken::new();

    let first = sync.push(&records, &users_map(), &cancel).unwrap();
    first.assign_remote_ids(&mut records);
    let writes = fake.count(Method::Post) + fake.count(Method::Put);

    let second = sync.push(&records, &users_map(), &cancel).unwrap();
    assert_eq!(second.counts().skipped, 4);
    assert_eq!(fake.count(Method::Post) + fake.count(Method::Put), writes);
    assert_eq!(fake.records("/users").len(), 4);
    assert_ne!(first.run_id(), second.run_id());
}

#[test]
fn conflict_fails_only_that_record() {
    let fake = Arc::new(FakeGalaxy::new());
    let records: Vec<LocalRecord> = seeded_users(&fake, 3)
        .into_iter()
        .map(|record| record.with_field("phone", "555-0100"))
        .collect();
    let conflicted: u64 = records[1].remote_id.as_ref().unwrap().as_str().parse().unwrap();
    fake.mark_conflict("/users", conflicted);
    let sync = synchronizer(fake.clone(), 3);

    let report = sync
        .push(&records, &users_map(), &CancellationToken::new())
        .unwrap();

    assert_eq!(report.outcomes()[0].outcome, SyncOutcome::Updated);
    assert_eq!(report.outcomes()[2].outcome, SyncOutcome::Updated);
    let failure = report.outcomes()[1].outcome.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Conflict);
    assert_eq!(failure.status, Some(409));
    assert_eq!(report.outcomes()[1].remote_id, records[1].remote_id);
    assert_eq!(fake.count(Method::Put), 3);
}

#[test]
fn server_errors_are_retried_within_one_outcome() {
    let fake = Arc::new(FakeGalaxy::new());
    fake.fail_times(Method::Post, "/users", Fault::Status(503), 3);
    let sync = synchronizer(fake.clone(), 1);

    let report = sync
        .push(&users(1), &users_map(), &CancellationToken::new())
        .unwrap();

    assert_eq!(outcomes(&report), vec![SyncOutcome::Created]);
    assert_eq!(fake.count(Method::Post), 4);
    assert_eq!(sync.transport().stats().server_retries, 3);
}

#[test]
fn rate_limited_write_waits_for_retry_after() {
    let fake = Arc::new(FakeGalaxy::new());
    fake.fail_times(Method::Post, "/users", Fault::RateLimited(Some(2)), 1);
    let (clock, transport) = manual_transport(fake.clone());
    let sync = BatchSynchronizer::new(transport, SyncConfig::default());

    let report = sync
        .push(&users(1), &users_map(), &CancellationToken::new())
        .unwrap();

    assert_eq!(report.counts().created, 1);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
}

#[test]
fn validation_failures_send_nothing() {
    let fake = Arc::new(FakeGalaxy::new());
    let sync = synchronizer(fake.clone(), 2);
    let records = vec![
        LocalRecord::default().with_field("first_name", "No email"),
        user("Ada", "ada@example.org"),
    ];

    let report = sync
        .push(&records, &users_map(), &CancellationToken::new())
        .unwrap();

    let failure = report.outcomes()[0].outcome.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Validation);
    assert_eq!(report.outcomes()[1].outcome, SyncOutcome::Created);
    assert_eq!(fake.request_count(), 1);
}

#[test]
fn unreachable_record_is_reported_not_raised() {
    let fake = Arc::new(FakeGalaxy::new());
    fake.fail_on(Method::Post, "/users", Fault::Status(500));
    let sync = synchronizer(fake.clone(), 1);

    let report = sync
        .push(&users(2), &users_map(), &CancellationToken::new())
        .unwrap();

    assert_eq!(report.counts().failed, 2);
    for (_, failure) in report.failures() {
        assert_eq!(failure.kind, ErrorKind::Transport);
        assert_eq!(failure.status, Some(500));
    }
}

#[test]
fn outcome_order_mirrors_input_with_many_workers() {
    let fake = Arc::new(FakeGalaxy::new());
    let sync = synchronizer(fake.clone(), 8);
    let mut records = users(30);

    let report = sync
        .push(&records, &users_map(), &CancellationToken::new())
        .unwrap();
    report.assign_remote_ids(&mut records);

    for (index, entry) in report.outcomes().iter().enumerate() {
        assert_eq!(entry.index, index);
        let id: u64 = entry.remote_id.as_ref().unwrap().as_str().parse().unwrap();
        let stored = fake.record("/users", id).unwrap();
        assert_eq!(stored.get("email"), records[index].get("email"));
    }
}

#[test]
fn workers_share_the_in_flight_ceiling() {
    let fake = Arc::new(FakeGalaxy::new());
    let config = client_config()
        .with_rate_limit(RateLimitConfig::new(10_000, Duration::from_secs(60)).with_max_in_flight(2));
    let (_clock, transport) = manual_transport_with(config, fake);
    let sync = BatchSynchronizer::new(transport, SyncConfig::default().with_workers(8));

    let report = sync
        .push(&users(20), &users_map(), &CancellationToken::new())
        .unwrap();

    assert_eq!(report.counts().created, 20);
    let stats = sync.transport().governor().stats();
    assert_eq!(stats.granted, 20);
    assert!(stats.peak_in_flight <= 2);
}

/// Cancels a token once `after` requests have completed.
struct CancelAfter {
    inner: FakeGalaxy,
    token: CancellationToken,
    after: usize,
    seen: AtomicUsize,
}

impl HttpClient for CancelAfter {
    fn execute(&self, request: &HttpRequest) -> Result<ApiResponse, NetworkError> {
        let response = self.inner.execute(request);
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.token.cancel();
        }
        response
    }
}

#[test]
fn cancellation_marks_unprocessed_records() {
    let token = CancellationToken::new();
    let client = CancelAfter {
        inner: FakeGalaxy::new(),
        token: token.clone(),
        after: 2,
        seen: AtomicUsize::new(0),
    };
    let (_clock, transport) = manual_transport(client);
    let sync = BatchSynchronizer::new(transport, SyncConfig::default().with_workers(1));

    let report = sync.push(&users(5), &users_map(), &token).unwrap();

    assert_eq!(
        outcomes(&report),
        vec![
            SyncOutcome::Created,
            SyncOutcome::Created,
            SyncOutcome::Cancelled,
            SyncOutcome::Cancelled,
            SyncOutcome::Cancelled,
        ]
    );
    assert_eq!(report.outcomes().len(), 5);
    assert_eq!(sync.state(), SyncState::Cancelled);
    assert_eq!(sync.transport().client().inner.records("/users").len(), 2);
}

#[test]
fn pull_of_empty_collection_has_no_outcomes() {
    let fake = Arc::new(FakeGalaxy::new());
    let sync = synchronizer(fake.clone(), 1);

    let report = sync
        .sync(&[], Direction::Pull, &FieldMap::new("/users"), &CancellationToken::new())
        .unwrap();

    assert!(report.outcomes().is_empty());
    assert!(report.pulled().is_empty());
    assert_eq!(fake.request_count(), 1);
}

#[test]
fn pull_walks_every_page() {
    let fake = Arc::new(FakeGalaxy::new());
    seeded_users(&fake, 25);
    let sync = synchronizer(fake.clone(), 1);

    let report = sync
        .pull(&FieldMap::new("/users"), &[], &[], &CancellationToken::new())
        .unwrap();

    assert_eq!(report.pulled().len(), 25);
    assert_eq!(report.counts().created, 25);
    assert_eq!(fake.request_count(), 3);
}

#[test]
fn pull_reconciles_against_local_records() {
    let fake = Arc::new(FakeGalaxy::new());
    let mut local = seeded_users(&fake, 3);
    local[1] = local[1].clone().with_field("first_name", "Renamed");
    local.pop();
    let sync = synchronizer(fake.clone(), 1);

    let report = sync
        .sync(&local, Direction::Pull, &FieldMap::new("/users"), &CancellationToken::new())
        .unwrap();

    assert_eq!(
        outcomes(&report),
        vec![SyncOutcome::Skipped, SyncOutcome::Updated, SyncOutcome::Created]
    );
    assert_eq!(report.pulled()[1].get("first_name"), Some(&json!("Volunteer 1")));
}

#[test]
fn pull_maps_fields_and_applies_filters() {
    let fake = Arc::new(FakeGalaxy::new());
    fake.seed("/users", json!({"user_fname": "Ada", "user_status": "active"}));
    fake.seed("/users", json!({"user_fname": "Bob", "user_status": "inactive"}));
    let sync = synchronizer(fake.clone(), 1);
    let map = FieldMap::new("/users").map("first_name", "user_fname");

    let report = sync
        .pull(
            &map,
            &[("user_status".to_string(), "active".to_string())],
            &[],
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(report.pulled().len(), 1);
    assert_eq!(report.pulled()[0].get("first_name"), Some(&json!("Ada")));
    assert_eq!(report.pulled()[0].remote_id, Some(RemoteId::from(1)));
}

#[test]
fn pull_failure_ends_with_failed_outcome() {
    let fake = Arc::new(FakeGalaxy::new());
    seeded_users(&fake, 15);
    let sync = synchronizer(fake.clone(), 1);
    fake.fail_on(Method::Get, "/users", Fault::Status(400));

    let report = sync
        .pull(&FieldMap::new("/users"), &[], &[], &CancellationToken::new())
        .unwrap();

    assert_eq!(report.counts().failed, 1);
    assert_eq!(report.outcomes().len(), 1);
}

#[test]
fn pull_stream_is_lazy() {
    let fake = Arc::new(FakeGalaxy::new());
    seeded_users(&fake, 25);
    let sync = synchronizer(fake.clone(), 1);
    let map = FieldMap::new("/users");

    let mut stream = sync.pull_stream(&map, &[]).unwrap();
    assert_eq!(fake.request_count(), 0);
    assert!(stream.next().unwrap().is_ok());
    assert_eq!(fake.request_count(), 1);
    assert_eq!(stream.count(), 24);
    assert_eq!(fake.request_count(), 3);
    assert_eq!(sync.state(), SyncState::Idle);
}

#[test]
fn templated_collection_cannot_be_pulled() {
    let sync = synchronizer(Arc::new(FakeGalaxy::new()), 1);
    let result = sync.pull(
        &FieldMap::new("/needs/{need_id}/shifts"),
        &[],
        &[],
        &CancellationToken::new(),
    );
    assert!(result.is_err());
    assert_eq!(sync.state(), SyncState::Idle);
}

#[test]
fn deactivation_looks_up_then_deletes() {
    let fake = Arc::new(FakeGalaxy::new());
    fake.seed("/users", json!({"user_email": "ada@example.org"}));
    fake.seed("/users", json!({"user_email": "bob@example.org"}));
    let sync = synchronizer(fake.clone(), 2);
    let cancel = CancellationToken::new();
    let emails = vec![
        "ada@example.org".to_string(),
        "nobody@example.org".to_string(),
        "bob@example.org".to_string(),
    ];

    let lookups = sync.lookup_ids("/users", "user_email", &emails, &cancel);
    assert_eq!(lookups[0].result, LookupResult::Found(RemoteId::from(1)));
    assert_eq!(lookups[1].result, LookupResult::NotFound);
    assert_eq!(lookups[2].value, "bob@example.org");

    let mut ids: Vec<RemoteId> = lookups.iter().filter_map(|l| l.remote_id().cloned()).collect();
    ids.push(RemoteId::from(99));
    let report = sync.delete("/users", &ids, &cancel).unwrap();

    assert_eq!(report.direction(), Direction::Delete);
    assert_eq!(
        outcomes(&report),
        vec![SyncOutcome::Deleted, SyncOutcome::Deleted, SyncOutcome::Skipped]
    );
    assert!(fake.records("/users").is_empty());
}

#[test]
fn lookup_treats_404_as_not_found() {
    let fake = Arc::new(FakeGalaxy::new());
    fake.fail_on(Method::Get, "/users", Fault::Status(404));
    let sync = synchronizer(fake, 1);

    let lookups = sync.lookup_ids(
        "/users",
        "user_email",
        &["ada@example.org".to_string()],
        &CancellationToken::new(),
    );
    assert_eq!(lookups[0].result, LookupResult::NotFound);
}

#[test]
fn delete_direction_requires_remote_ids() {
    let fake = Arc::new(FakeGalaxy::new());
    let mut records = seeded_users(&fake, 1);
    records.push(user("Nobody", "nobody@example.org"));
    let sync = synchronizer(fake.clone(), 1);

    let report = sync
        .sync(&records, Direction::Delete, &users_map(), &CancellationToken::new())
        .unwrap();

    assert_eq!(report.outcomes()[0].outcome, SyncOutcome::Deleted);
    assert_eq!(
        report.outcomes()[1].outcome.failure().map(|f| f.kind),
        Some(ErrorKind::Validation)
    );
}

#[test]
fn shift_batches_are_pushed_per_need() {
    let fake = Arc::new(FakeGalaxy::new());
    let layout = ShiftLayout::default().with_drop_columns(["need_title"]);
    let batches = plan_shift_batches(&sample_shift_rows(), &layout).unwrap();
    let sync = synchronizer(fake.clone(), 2);

    let report = sync
        .push(&batches, &layout.field_map(), &CancellationToken::new())
        .unwrap();

    assert_eq!(report.counts().created, 2);
    let need_12 = fake.records("/needs/12/shifts");
    assert_eq!(need_12.len(), 2);
    assert_eq!(need_12[0].get("start"), Some(&json!("2023-05-01 09:00")));
    assert!(need_12[0].get("need_title").is_none());
    assert_eq!(fake.records("/needs/4/shifts").len(), 1);

    let posts: Vec<String> = fake
        .requests()
        .iter()
        .map(|r| r.url.trim_start_matches(FAKE_BASE_URL).to_string())
        .collect();
    assert!(posts.contains(&"/needs/4/shifts".to_string()));
    assert!(posts.contains(&"/needs/12/shifts".to_string()));
}

#[test]
fn credential_rejection_aborts_run() {
    let fake = Arc::new(FakeGalaxy::new().with_token("another-token"));
    let (_clock, transport): (_, Transport<_>) = manual_transport(fake.clone());
    let config = SyncConfig::default().with_probe(starpass_protocol::ApiRequest::get("/users"));
    let sync = BatchSynchronizer::new(transport, config);

    let err = sync
        .push(&users(3), &users_map(), &CancellationToken::new())
        .unwrap_err();
    assert!(err.is_run_level());
    assert_eq!(fake.request_count(), 1);
    assert_eq!(sync.state(), SyncState::Error);

    // A failed run does not block the next one; it probes and aborts again
    assert!(matches!(
        sync.push(&users(1), &users_map(), &CancellationToken::new()),
        Err(SyncError::RunAborted { .. })
    ));
    assert_eq!(fake.request_count(), 2);
    assert_eq!(sync.stats().runs_aborted, 2);
}

#[test]
fn shift_batches_failing_schema_are_not_sent() {
    let fake = Arc::new(FakeGalaxy::new());
    let layout = ShiftLayout::default().with_drop_columns(["need_title"]);
    let mut rows = sample_shift_rows();
    rows[1].insert("slots".into(), "many".into());
    let batches = plan_shift_batches(&rows, &layout).unwrap();
    let schema = BodySchema::new(json!({
        "type": "object",
        "required": ["shifts"],
        "properties": {
            "shifts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {"slots": {"type": "string", "pattern": "^[0-9]+$"}}
                }
            }
        }
    }))
    .unwrap();
    let map = layout.field_map().with_schema(schema);
    let sync = synchronizer(fake.clone(), 2);

    let report = sync.push(&batches, &map, &CancellationToken::new()).unwrap();

    // Need 4 sorts first and carries the bad row
    let failure = report.outcomes()[0].outcome.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Validation);
    assert!(failure.message.contains("/shifts/0/slots"), "{failure}");
    assert_eq!(report.outcomes()[1].outcome, SyncOutcome::Created);
    assert!(fake.records("/needs/4/shifts").is_empty());
    assert_eq!(fake.records("/needs/12/shifts").len(), 2);
    assert_eq!(fake.count(Method::Post), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_input_record_gets_one_outcome(records in local_records_strategy(12), workers in 1usize..6) {
        let fake = Arc::new(FakeGalaxy::new());
        let sync = synchronizer(fake, workers);

        let report = sync
            .push(&records, &FieldMap::new("/users"), &CancellationToken::new())
            .unwrap();

        prop_assert_eq!(report.outcomes().len(), records.len());
        prop_assert_eq!(report.counts().total(), records.len());
        for (index, entry) in report.outcomes().iter().enumerate() {
            prop_assert_eq!(entry.index, index);
            if records[index].remote_id.is_none() {
                prop_assert_eq!(&entry.outcome, &SyncOutcome::Created);
            }
        }
    }
}
