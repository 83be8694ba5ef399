//! Requests and responses exchanged with the API.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// HTTP method of an API request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Returns the method name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Returns true if the method writes remote state.
    pub fn is_write(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single API call, relative to the configured base URL.
///
/// Built fresh for each call and handed to the transport by reference, so it
/// is never mutated after dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path below the base URL, starting with `/`.
    pub path: String,
    /// Query parameters. Keys are unique.
    pub query: BTreeMap<String, String>,
    /// Optional JSON body.
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Creates a request with no query and no body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            method,
            path,
            query: BTreeMap::new(),
            body: None,
        }
    }

    /// Creates a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Creates a POST request with a JSON body.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    /// Creates a PUT request with a JSON body.
    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    /// Creates a DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Sets a query parameter, replacing any previous value for the key.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Merges a set of query parameters.
    pub fn with_queries<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in params {
            self.query.insert(key.into(), value.into());
        }
        self
    }

    /// Sets the JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Joins the path onto a base URL without doubling slashes.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.path)
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// Status code.
    pub status: u16,
    /// Headers with lower-cased names.
    pub headers: BTreeMap<String, String>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Creates a response with no headers.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Creates a response carrying a JSON body.
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string()).with_header("content-type", "application/json")
    }

    /// Adds a header. The name is lower-cased.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the `Retry-After` hint in delta-seconds form, if present.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Returns the body as lossy UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON. An empty body decodes to `null`.
    pub fn json_value(&self) -> ProtocolResult<Value> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| ProtocolError::decode(format!("invalid JSON body: {e}")))
    }

    /// Decodes the body into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ProtocolError::decode(format!("unexpected body shape: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_builder() {
        let request = ApiRequest::get("users")
            .with_query("user_email", "a@example.org")
            .with_query("user_email", "b@example.org");

        assert_eq!(request.path, "/users");
        assert_eq!(request.query.len(), 1);
        assert_eq!(request.query["user_email"], "b@example.org");
        assert!(request.body.is_none());
        assert_eq!(request.to_string(), "GET /users");
    }

    #[test]
    fn request_url_join() {
        let request = ApiRequest::post("/needs/7/shifts", json!({"shifts": []}));
        assert_eq!(
            request.url("https://api.galaxydigital.com/api/"),
            "https://api.galaxydigital.com/api/needs/7/shifts"
        );
        assert!(request.method.is_write());
    }

    #[test]
    fn response_headers_are_case_insensitive() {
        let response = ApiResponse::new(429, "").with_header("Retry-After", "7");
        assert_eq!(response.header("retry-after"), Some("7"));
        assert_eq!(response.retry_after(), Some(Duration::from_secs(7)));
        assert!(!response.is_success());
    }

    #[test]
    fn retry_after_ignores_http_dates() {
        let response =
            ApiResponse::new(429, "").with_header("retry-after", "Wed, 21 Oct 2026 07:28:00 GMT");
        assert_eq!(response.retry_after(), None);
    }

    #[test]
    fn empty_body_is_null() {
        let response = ApiResponse::new(204, "");
        assert_eq!(response.json_value().unwrap(), Value::Null);
    }

    #[test]
    fn malformed_body_is_decode_error() {
        let response = ApiResponse::new(200, "{\"data\": [");
        assert!(matches!(
            response.json_value(),
            Err(ProtocolError::Decode(_))
        ));
    }
}
