//! HTTP client seam.
//!
//! The transport builds fully-resolved `HttpRequest`s and hands them to an
//! `HttpClient`. `ReqwestClient` talks to the network; tests plug in
//! `MockHttpClient` or an in-memory service instead.

use crate::error::{ClientError, ClientResult};
use starpass_protocol::{ApiResponse, Method};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A resolved HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL without query string.
    pub url: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Encoded body.
    pub body: Option<Vec<u8>>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpRequest {
    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the query as a map.
    pub fn query_map(&self) -> BTreeMap<&str, &str> {
        self.query
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

/// Kind of network failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The request timed out.
    Timeout,
    /// The connection could not be established or was reset.
    Connect,
    /// Anything else (bad URL, TLS setup, body errors).
    Other,
}

/// A failure before any HTTP response was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct NetworkError {
    /// Failure kind.
    pub kind: NetworkErrorKind,
    /// Failure description.
    pub message: String,
}

impl NetworkError {
    /// Creates a network error.
    pub fn new(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns true for timeouts and connection failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            NetworkErrorKind::Timeout | NetworkErrorKind::Connect
        )
    }
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Executes one request. Any HTTP status counts as a response.
    fn execute(&self, request: &HttpRequest) -> Result<ApiResponse, NetworkError>;
}

impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    fn execute(&self, request: &HttpRequest) -> Result<ApiResponse, NetworkError> {
        (**self).execute(request)
    }
}

/// `reqwest`-backed blocking client.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Builds a client sending `user_agent`.
    pub fn new(user_agent: &str) -> ClientResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn execute(&self, request: &HttpRequest) -> Result<ApiResponse, NetworkError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .query(&request.query)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().map_err(network_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response.bytes().map_err(network_error)?.to_vec();

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

fn network_error(err: reqwest::Error) -> NetworkError {
    let kind = if err.is_timeout() {
        NetworkErrorKind::Timeout
    } else if err.is_connect() || err.is_request() {
        NetworkErrorKind::Connect
    } else {
        NetworkErrorKind::Other
    };
    NetworkError::new(kind, err.to_string())
}
