//! Scripted HTTP client for tests.

use crate::http::{HttpClient, HttpRequest, NetworkError};
use parking_lot::Mutex;
use serde_json::Value;
use starpass_protocol::ApiResponse;
use std::collections::VecDeque;

/// An `HttpClient` that replays queued results and records every request.
///
/// When the queue is empty it answers with the fallback response
/// (`200 {"data": []}` unless changed).
#[derive(Debug)]
pub struct MockHttpClient {
    script: Mutex<VecDeque<Result<ApiResponse, NetworkError>>>,
    fallback: Mutex<ApiResponse>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttpClient {
    /// Creates a mock with an empty script.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(ApiResponse::json(200, &serde_json::json!({"data": []}))),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a response.
    pub fn push_response(&self, response: ApiResponse) -> &Self {
        self.script.lock().push_back(Ok(response));
        self
    }

    /// Queues a JSON response.
    pub fn push_json(&self, status: u16, body: Value) -> &Self {
        self.push_response(ApiResponse::json(status, &body))
    }

    /// Queues a network failure.
    pub fn push_error(&self, error: NetworkError) -> &Self {
        self.script.lock().push_back(Err(error));
        self
    }

    /// Sets the response used once the script runs out.
    pub fn set_fallback(&self, response: ApiResponse) {
        *self.fallback.lock() = response;
    }

    /// Returns all requests received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for MockHttpClient {
    fn execute(&self, request: &HttpRequest) -> Result<ApiResponse, NetworkError> {
        self.requests.lock().push(request.clone());
        match self.script.lock().pop_front() {
            Some(result) => result,
            None => Ok(self.fallback.lock().clone()),
        }
    }
}
