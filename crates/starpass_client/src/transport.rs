//! Authenticated transport with retry and rate governance.

use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, RetryConfig};
use crate::credential::Credential;
use crate::error::{ClientError, ClientResult};
use crate::governor::RateGovernor;
use crate::http::{HttpClient, HttpRequest, NetworkError};
use crate::pagination::Pages;
use crate::retry::{RetryMachine, TransientFailure};
use parking_lot::RwLock;
use serde_json::Value;
use starpass_protocol::{ApiRequest, ApiResponse, Cursor, Page};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Transport statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Calls made through `send`.
    pub calls: u64,
    /// HTTP attempts, including retries.
    pub attempts: u64,
    /// Retries after network errors or 5xx responses.
    pub server_retries: u64,
    /// Retries after 429 responses.
    pub rate_limited_retries: u64,
    /// Calls that ended in an error.
    pub failures: u64,
}

/// What one attempt produced.
enum Attempt {
    Done(ApiResponse),
    Fatal(ClientError),
    Transient {
        failure: TransientFailure,
        status: Option<u16>,
        body: String,
    },
}

/// Sends authenticated requests to the API.
///
/// Every HTTP attempt holds one permit from the shared `RateGovernor` for
/// exactly the duration of the request.
pub struct Transport<C: HttpClient> {
    base_url: String,
    credential: Credential,
    client: C,
    timeout: Duration,
    page_size: u32,
    retry: RetryConfig,
    governor: Arc<RateGovernor>,
    clock: Arc<dyn Clock>,
    stats: RwLock<TransportStats>,
}

impl<C: HttpClient> Transport<C> {
    /// Creates a transport with its own governor built from the config.
    pub fn new(config: ClientConfig, client: C) -> Self {
        let governor = Arc::new(RateGovernor::new(config.rate_limit.clone()));
        Self {
            base_url: config.base_url,
            credential: config.credential,
            client,
            timeout: config.timeout,
            page_size: config.page_size,
            retry: config.retry,
            governor,
            clock: Arc::new(SystemClock),
            stats: RwLock::new(TransportStats::default()),
        }
    }

    /// Shares an existing governor.
    pub fn with_governor(mut self, governor: Arc<RateGovernor>) -> Self {
        self.governor = governor;
        self
    }

    /// Uses the given clock for backoff waits.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the page size used by list requests.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Returns the shared governor.
    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// Returns the underlying HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> TransportStats {
        self.stats.read().clone()
    }

    /// Sends a request, retrying transient failures.
    ///
    /// Returns the 2xx response. 401/403 map to `Unauthorized`, 409/412 to
    /// `Conflict`, other non-success statuses to `Transport`.
    pub fn send(&self, request: &ApiRequest) -> ClientResult<ApiResponse> {
        let http = self.resolve(request)?;
        let mut machine = RetryMachine::new(&self.retry);
        self.stats.write().calls += 1;

        loop {
            let attempt = machine.begin_attempt();
            debug!(%request, attempt, "sending request");

            let outcome = {
                let _permit = self.governor.acquire().map_err(|e| {
                    machine.fail();
                    e
                })?;
                self.stats.write().attempts += 1;
                classify(self.client.execute(&http))
            };

            match outcome {
                Attempt::Done(response) => {
                    machine.succeed();
                    debug!(%request, status = response.status, attempt, "request succeeded");
                    return Ok(response);
                }
                Attempt::Fatal(err) => {
                    machine.fail();
                    self.stats.write().failures += 1;
                    return Err(attach_attempts(err, machine.attempts()));
                }
                Attempt::Transient {
                    failure,
                    status,
                    body,
                } => match machine.on_transient(failure) {
                    Some(delay) => {
                        {
                            let mut stats = self.stats.write();
                            match failure {
                                TransientFailure::Server => stats.server_retries += 1,
                                TransientFailure::RateLimited(_) => stats.rate_limited_retries += 1,
                            }
                        }
                        warn!(%request, ?status, attempt, ?delay, "transient failure, retrying");
                        self.clock.sleep(delay);
                    }
                    None => {
                        self.stats.write().failures += 1;
                        warn!(%request, ?status, attempts = machine.attempts(), "retries exhausted");
                        let message = match status {
                            Some(status) => format!("{request} failed with HTTP {status}"),
                            None => format!("{request} failed: {body}"),
                        };
                        return Err(ClientError::Transport {
                            status,
                            body,
                            message,
                            attempts: machine.attempts(),
                        });
                    }
                },
            }
        }
    }

    /// Sends a request and decodes the JSON body.
    pub fn send_json(&self, request: &ApiRequest) -> ClientResult<Value> {
        Ok(self.send(request)?.json_value()?)
    }

    /// Fetches and decodes one page of a list endpoint.
    pub fn fetch_page(&self, request: &ApiRequest) -> ClientResult<Page> {
        let envelope = self.send_json(request)?;
        Ok(Page::from_envelope(&envelope)?)
    }

    /// Walks a list endpoint from the first page.
    pub fn pages<K, V>(&self, endpoint: &str, filters: impl IntoIterator<Item = (K, V)>) -> Pages<'_, C>
    where
        K: Into<String>,
        V: Into<String>,
    {
        Pages::new(self, self.list_request(endpoint, filters), None)
    }

    /// Walks a list endpoint starting at a previously captured cursor.
    pub fn pages_from<K, V>(
        &self,
        endpoint: &str,
        filters: impl IntoIterator<Item = (K, V)>,
        cursor: Cursor,
    ) -> Pages<'_, C>
    where
        K: Into<String>,
        V: Into<String>,
    {
        Pages::new(self, self.list_request(endpoint, filters), Some(cursor))
    }

    fn list_request<K, V>(&self, endpoint: &str, filters: impl IntoIterator<Item = (K, V)>) -> ApiRequest
    where
        K: Into<String>,
        V: Into<String>,
    {
        ApiRequest::get(endpoint)
            .with_query("per_page", self.page_size.to_string())
            .with_queries(filters)
    }

    fn resolve(&self, request: &ApiRequest) -> ClientResult<HttpRequest> {
        let mut headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            (
                "Authorization".to_string(),
                self.credential.authorization().to_string(),
            ),
        ];
        let body = match &request.body {
            Some(body) => {
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
                Some(serde_json::to_vec(body).map_err(|e| {
                    ClientError::InvalidRequest(format!("unencodable body for {request}: {e}"))
                })?)
            }
            None => None,
        };

        Ok(HttpRequest {
            method: request.method,
            url: request.url(&self.base_url),
            query: request
                .query
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            headers,
            body,
            timeout: self.timeout,
        })
    }
}

fn classify(result: Result<ApiResponse, NetworkError>) -> Attempt {
    let response = match result {
        Ok(response) => response,
        Err(err) if err.is_transient() => {
            return Attempt::Transient {
                failure: TransientFailure::Server,
                status: None,
                body: err.to_string(),
            }
        }
        Err(err) => return Attempt::Fatal(ClientError::unreachable(err.to_string(), 1)),
    };

    match response.status {
        200..=299 => Attempt::Done(response),
        429 => Attempt::Transient {
            failure: TransientFailure::RateLimited(response.retry_after()),
            status: Some(429),
            body: response.text(),
        },
        500..=599 => Attempt::Transient {
            failure: TransientFailure::Server,
            status: Some(response.status),
            body: response.text(),
        },
        401 | 403 => Attempt::Fatal(ClientError::Unauthorized {
            status: response.status,
            body: response.text(),
        }),
        409 | 412 => Attempt::Fatal(ClientError::Conflict {
            status: response.status,
            body: response.text(),
        }),
        status => Attempt::Fatal(ClientError::Transport {
            status: Some(status),
            body: response.text(),
            message: format!("request rejected with HTTP {status}"),
            attempts: 1,
        }),
    }
}

fn attach_attempts(err: ClientError, attempts: u32) -> ClientError {
    match err {
        ClientError::Transport {
            status,
            body,
            message,
            ..
        } => ClientError::Transport {
            status,
            body,
            message,
            attempts,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::http::NetworkErrorKind;
    use crate::mock::MockHttpClient;
    use serde_json::json;

    fn transport(client: MockHttpClient) -> (Arc<ManualClock>, Transport<MockHttpClient>) {
        let clock = Arc::new(ManualClock::new());
        let config = ClientConfig::new(
            "https://api.galaxydigital.com/api",
            Credential::new("test-token").unwrap(),
        )
        .with_retry(
            RetryConfig::default()
                .with_initial_delay(Duration::from_millis(100))
                .without_jitter(),
        );
        let transport = Transport::new(config, client).with_clock(clock.clone());
        (clock, transport)
    }

    #[test]
    fn injects_auth_and_accept_headers() {
        let (_clock, transport) = transport(MockHttpClient::new());
        transport
            .send(&ApiRequest::post("/needs/4/shifts", json!({"shifts": []})))
            .unwrap();

        let sent = &transport.client().requests()[0];
        assert_eq!(sent.header("authorization"), Some("Bearer test-token"));
        assert_eq!(sent.header("accept"), Some("application/json"));
        assert_eq!(sent.header("content-type"), Some("application/json"));
        assert_eq!(sent.url, "https://api.galaxydigital.com/api/needs/4/shifts");
        assert_eq!(sent.body.as_deref(), Some(br#"{"shifts":[]}"#.as_slice()));
    }

    #[test]
    fn retries_server_errors_then_succeeds() {
        let client = MockHttpClient::new();
        client
            .push_response(ApiResponse::new(503, "busy"))
            .push_response(ApiResponse::new(503, "busy"))
            .push_response(ApiResponse::new(503, "busy"))
            .push_json(200, json!({"data": {"id": 1}}));
        let (clock, transport) = transport(client);

        let body = transport.send_json(&ApiRequest::get("/users/1")).unwrap();
        assert_eq!(body["data"]["id"], 1);
        assert_eq!(transport.client().request_count(), 4);
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
        let stats = transport.stats();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.attempts, 4);
        assert_eq!(stats.server_retries, 3);
    }

    #[test]
    fn exhausted_retries_carry_last_status_and_body() {
        let client = MockHttpClient::new();
        client.set_fallback(ApiResponse::new(502, "bad gateway"));
        let (_clock, transport) = transport(client);

        let err = transport.send(&ApiRequest::get("/users")).unwrap_err();
        match err {
            ClientError::Transport {
                status,
                body,
                attempts,
                ..
            } => {
                assert_eq!(status, Some(502));
                assert_eq!(body, "bad gateway");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn client_errors_are_not_retried() {
        let client = MockHttpClient::new();
        client.push_response(ApiResponse::new(422, "invalid shift"));
        let (clock, transport) = transport(client);

        let err = transport.send(&ApiRequest::get("/users")).unwrap_err();
        assert_eq!(err.status(), Some(422));
        assert_eq!(transport.client().request_count(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn conflicts_and_auth_failures_are_classified() {
        let client = MockHttpClient::new();
        client
            .push_response(ApiResponse::new(409, "stale"))
            .push_response(ApiResponse::new(401, "bad token"));
        let (_clock, transport) = transport(client);

        assert!(matches!(
            transport.send(&ApiRequest::put("/users/1", json!({}))),
            Err(ClientError::Conflict { status: 409, .. })
        ));
        assert!(matches!(
            transport.send(&ApiRequest::get("/users")),
            Err(ClientError::Unauthorized { status: 401, .. })
        ));
    }

    #[test]
    fn honors_retry_after_without_using_failure_budget() {
        let client = MockHttpClient::new();
        for _ in 0..4 {
            client.push_response(ApiResponse::new(429, "").with_header("Retry-After", "2"));
        }
        client.push_json(200, json!({"data": []}));
        let (clock, transport) = transport(client);

        transport.send(&ApiRequest::get("/users")).unwrap();
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 4]);
        assert_eq!(transport.stats().rate_limited_retries, 4);
        assert_eq!(transport.stats().server_retries, 0);
    }

    #[test]
    fn network_errors() {
        let client = MockHttpClient::new();
        client
            .push_error(NetworkError::new(NetworkErrorKind::Connect, "connection reset"))
            .push_json(200, json!({"data": []}))
            .push_error(NetworkError::new(NetworkErrorKind::Other, "invalid url"));
        let (_clock, transport) = transport(client);

        assert!(transport.send(&ApiRequest::get("/users")).is_ok());
        let err = transport.send(&ApiRequest::get("/users")).unwrap_err();
        assert!(err.is_run_level());
    }

    #[test]
    fn malformed_body_is_decode_error() {
        let client = MockHttpClient::new();
        client.push_response(ApiResponse::new(200, "<html>"));
        let (_clock, transport) = transport(client);

        assert!(matches!(
            transport.send_json(&ApiRequest::get("/users")),
            Err(ClientError::Decode(_))
        ));
    }

    #[test]
    fn every_attempt_takes_a_permit() {
        let client = MockHttpClient::new();
        client
            .push_response(ApiResponse::new(500, ""))
            .push_json(200, json!({"data": []}));
        let (_clock, transport) = transport(client);

        transport.send(&ApiRequest::get("/users")).unwrap();
        assert_eq!(transport.governor().stats().granted, 2);
        assert_eq!(transport.governor().in_flight(), 0);
    }
}
