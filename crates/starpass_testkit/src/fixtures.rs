//! Test fixtures.
//!
//! Ready-made configurations, transports and records for tests that run
//! against `FakeGalaxy` or a scripted mock.

use crate::fake::FAKE_BASE_URL;
use serde_json::json;
use starpass_client::{
    ClientConfig, Credential, HttpClient, ManualClock, RateLimitConfig, RetryConfig, Transport,
};
use starpass_protocol::shifts::ShiftRow;
use starpass_protocol::LocalRecord;
use std::sync::Arc;
use std::time::Duration;

/// Token used by every fixture.
pub const TEST_TOKEN: &str = "test-token";

/// Client configuration pointing at the fake service.
///
/// Retries are deterministic (no jitter, 100ms initial delay) and the rate
/// ceiling is high enough not to interfere unless a test lowers it.
pub fn client_config() -> ClientConfig {
    ClientConfig::new(
        FAKE_BASE_URL,
        Credential::new(TEST_TOKEN).expect("Fixture token is valid"),
    )
    .with_page_size(10)
    .with_retry(
        RetryConfig::default()
            .with_initial_delay(Duration::from_millis(100))
            .without_jitter(),
    )
    .with_rate_limit(RateLimitConfig::new(10_000, Duration::from_secs(60)).with_max_in_flight(16))
}

/// Builds a transport on a manual clock, so backoff waits cost nothing.
pub fn manual_transport<C: HttpClient>(client: C) -> (Arc<ManualClock>, Transport<C>) {
    manual_transport_with(client_config(), client)
}

/// Builds a transport on a manual clock from a custom configuration.
pub fn manual_transport_with<C: HttpClient>(
    config: ClientConfig,
    client: C,
) -> (Arc<ManualClock>, Transport<C>) {
    let clock = Arc::new(ManualClock::new());
    let transport = Transport::new(config, client).with_clock(clock.clone());
    (clock, transport)
}

/// A volunteer record without a remote id.
pub fn user(first_name: &str, email: &str) -> LocalRecord {
    LocalRecord::default()
        .with_field("first_name", first_name)
        .with_field("email", email)
}

/// `count` distinct volunteer records without remote ids.
pub fn users(count: usize) -> Vec<LocalRecord> {
    (0..count)
        .map(|n| user(&format!("Volunteer {n}"), &format!("volunteer{n}@example.org")))
        .collect()
}

/// Seeds `count` users into the fake and returns matching local records.
pub fn seeded_users(fake: &crate::FakeGalaxy, count: usize) -> Vec<LocalRecord> {
    users(count)
        .into_iter()
        .map(|record| {
            let id = fake.seed("/users", json!(record.fields));
            record.with_remote_id(id)
        })
        .collect()
}

/// One CSV-style shift row.
pub fn shift_row(need_id: &str, date: &str, time: &str) -> ShiftRow {
    [
        ("need_id", need_id),
        ("start_date", date),
        ("start_time", time),
        ("duration", "120"),
        ("slots", "4"),
        ("need_title", "Food bank"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Shift rows for two needs, with one duplicate.
pub fn sample_shift_rows() -> Vec<ShiftRow> {
    vec![
        shift_row("12", "2023-05-01", "09:00"),
        shift_row("4", "2023-05-01", "13:00"),
        shift_row("12", "2023-05-02", "09:00"),
        shift_row("12", "2023-05-01", "09:00"),
    ]
}
