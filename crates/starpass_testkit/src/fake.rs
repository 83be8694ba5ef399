//! In-memory GalaxyDigital service.
//!
//! `FakeGalaxy` implements `HttpClient` directly, so a `Transport` can talk
//! to it without a network. It understands the subset of the API the
//! synchronizer uses:
//!
//! - `GET {collection}` with `page`/`per_page` and field filters
//! - `GET {collection}/{id}`
//! - `POST {collection}`, including `{"shifts": [...]}` style bulk bodies
//! - `PUT`/`PATCH {collection}/{id}` (fields are merged)
//! - `DELETE {collection}/{id}`
//!
//! Faults can be queued for the next request or attached to a route.

use parking_lot::Mutex;
use serde_json::{json, Value};
use starpass_client::{HttpClient, HttpRequest, NetworkError, NetworkErrorKind};
use starpass_protocol::{ApiResponse, Fields, Method, RemoteId, RemoteRecord};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Base URL the fake answers under.
pub const FAKE_BASE_URL: &str = "https://galaxy.test/api";

const DEFAULT_PER_PAGE: usize = 25;

/// An injected failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Respond with this status.
    Status(u16),
    /// Respond 429, with `Retry-After` seconds if given.
    RateLimited(Option<u64>),
    /// Fail without a response.
    Network(NetworkErrorKind),
}

impl Fault {
    fn respond(&self) -> Result<ApiResponse, NetworkError> {
        match self {
            Fault::Status(status) => Ok(message(*status, "injected fault")),
            Fault::RateLimited(Some(secs)) => {
                Ok(message(429, "too many requests").with_header("Retry-After", secs.to_string()))
            }
            Fault::RateLimited(None) => Ok(message(429, "too many requests")),
            Fault::Network(kind) => Err(NetworkError::new(*kind, "injected network fault")),
        }
    }
}

#[derive(Debug)]
struct Rule {
    method: Method,
    path: String,
    fault: Fault,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct FakeState {
    collections: BTreeMap<String, BTreeMap<u64, Fields>>,
    next_id: u64,
    conflicted: BTreeSet<String>,
    queued: VecDeque<Fault>,
    rules: Vec<Rule>,
    log: Vec<HttpRequest>,
    token: Option<String>,
}

/// In-memory stand-in for the GalaxyDigital API.
#[derive(Debug, Default)]
pub struct FakeGalaxy {
    state: Mutex<FakeState>,
}

impl FakeGalaxy {
    /// Creates an empty service that accepts any token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `Authorization: Bearer {token}` on every request.
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.state.lock().token = Some(token.into());
        self
    }

    /// Inserts a record and returns its id.
    ///
    /// A numeric `id` field in `value` is used as the id; otherwise one is
    /// assigned.
    pub fn seed(&self, collection: &str, value: Value) -> RemoteId {
        let mut state = self.state.lock();
        let Value::Object(mut fields) = value else {
            panic!("seeded records must be JSON objects");
        };
        let id = match fields.remove("id").and_then(|id| id.as_u64()) {
            Some(id) => {
                state.next_id = state.next_id.max(id);
                id
            }
            None => state.allocate_id(),
        };
        state
            .collections
            .entry(normalize(collection))
            .or_default()
            .insert(id, fields);
        RemoteId::from(id)
    }

    /// Returns every record of a collection in id order.
    pub fn records(&self, collection: &str) -> Vec<RemoteRecord> {
        self.state
            .lock()
            .collections
            .get(&normalize(collection))
            .map(|records| {
                records
                    .iter()
                    .map(|(id, fields)| RemoteRecord::new(*id, fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns one record.
    pub fn record(&self, collection: &str, id: u64) -> Option<RemoteRecord> {
        self.state
            .lock()
            .collections
            .get(&normalize(collection))
            .and_then(|records| records.get(&id))
            .map(|fields| RemoteRecord::new(id, fields.clone()))
    }

    /// Makes updates of a record answer 409.
    pub fn mark_conflict(&self, collection: &str, id: u64) {
        self.state
            .lock()
            .conflicted
            .insert(format!("{}/{id}", normalize(collection)));
    }

    /// Answers the next request with `fault`, whatever its route.
    pub fn push_fault(&self, fault: Fault) {
        self.state.lock().queued.push_back(fault);
    }

    /// Answers every matching request with `fault`.
    pub fn fail_on(&self, method: Method, path: &str, fault: Fault) {
        self.add_rule(method, path, fault, None);
    }

    /// Answers the next `times` matching requests with `fault`.
    pub fn fail_times(&self, method: Method, path: &str, fault: Fault, times: usize) {
        self.add_rule(method, path, fault, Some(times));
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().log.clone()
    }

    /// Returns the number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.state.lock().log.len()
    }

    /// Returns the number of requests received with `method`.
    pub fn count(&self, method: Method) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|request| request.method == method)
            .count()
    }

    fn add_rule(&self, method: Method, path: &str, fault: Fault, remaining: Option<usize>) {
        self.state.lock().rules.push(Rule {
            method,
            path: normalize(path),
            fault,
            remaining,
        });
    }
}

impl HttpClient for FakeGalaxy {
    fn execute(&self, request: &HttpRequest) -> Result<ApiResponse, NetworkError> {
        let mut state = self.state.lock();
        state.log.push(request.clone());

        if let Some(fault) = state.queued.pop_front() {
            return fault.respond();
        }
        let path = normalize(request.url.strip_prefix(FAKE_BASE_URL).unwrap_or(&request.url));
        if let Some(fault) = state.take_rule(request.method, &path) {
            return fault.respond();
        }
        if let Some(token) = &state.token {
            if request.header("authorization") != Some(format!("Bearer {token}").as_str()) {
                return Ok(message(401, "unauthenticated"));
            }
        }
        Ok(state.route(request, &path))
    }
}

impl FakeState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_rule(&mut self, method: Method, path: &str) -> Option<Fault> {
        let index = self
            .rules
            .iter()
            .position(|rule| rule.method == method && rule.path == path)?;
        let rule = &mut self.rules[index];
        let fault = rule.fault.clone();
        if let Some(remaining) = &mut rule.remaining {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.rules.remove(index);
            }
        }
        Some(fault)
    }

    fn route(&mut self, request: &HttpRequest, path: &str) -> ApiResponse {
        let body = match &request.body {
            Some(bytes) => match serde_json::from_slice::<Value>(bytes) {
                Ok(value) => Some(value),
                Err(_) => return message(400, "malformed JSON body"),
            },
            None => None,
        };

        match (request.method, split_item(path)) {
            (Method::Get, Some((collection, id))) => self.show(collection, id),
            (Method::Get, None) => self.list(path, request),
            (Method::Post, None) => self.create(path, body),
            (Method::Put | Method::Patch, Some((collection, id))) => {
                self.update(path, collection, id, body)
            }
            (Method::Delete, Some((collection, id))) => self.destroy(collection, id),
            _ => message(405, "method not allowed"),
        }
    }

    fn show(&self, collection: &str, id: u64) -> ApiResponse {
        match self.collections.get(collection).and_then(|c| c.get(&id)) {
            Some(fields) => ApiResponse::json(200, &json!({ "data": render(id, fields) })),
            None => message(404, "not found"),
        }
    }

    fn list(&self, path: &str, request: &HttpRequest) -> ApiResponse {
        let query = request.query_map();
        let per_page = query
            .get("per_page")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_PER_PAGE)
            .max(1);
        let page = query
            .get("page")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        let filters: Vec<(&str, &str)> = query
            .iter()
            .filter(|(key, _)| !matches!(**key, "page" | "per_page" | "cursor"))
            .map(|(key, value)| (*key, *value))
            .collect();

        let matching: Vec<Value> = self
            .collections
            .get(path)
            .into_iter()
            .flatten()
            .filter(|(_, fields)| {
                filters
                    .iter()
                    .all(|(key, value)| fields.get(*key).is_some_and(|field| text_eq(field, value)))
            })
            .map(|(id, fields)| render(*id, fields))
            .collect();

        let total = matching.len();
        let last_page = total.div_ceil(per_page).max(1);
        let data: Vec<Value> = matching
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();
        let next = (page < last_page).then(|| format!("{FAKE_BASE_URL}{path}?page={}", page + 1));

        ApiResponse::json(
            200,
            &json!({
                "data": data,
                "meta": {
                    "current_page": page,
                    "last_page": last_page,
                    "per_page": per_page,
                    "total": total,
                },
                "links": { "next": next },
            }),
        )
    }

    fn create(&mut self, path: &str, body: Option<Value>) -> ApiResponse {
        let Some(Value::Object(fields)) = body else {
            return message(422, "body must be a JSON object");
        };

        // A single array-of-objects field is a bulk create, e.g. {"shifts": [...]}
        let bulk = match fields.iter().next() {
            Some((_, Value::Array(items))) if fields.len() == 1 && items.iter().all(Value::is_object) => {
                Some(items.clone())
            }
            _ => None,
        };

        match bulk {
            Some(items) => {
                let created: Vec<Value> = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(fields) => Some(self.insert(path, fields)),
                        _ => None,
                    })
                    .collect();
                ApiResponse::json(201, &json!({ "data": created }))
            }
            None => {
                let created = self.insert(path, fields);
                ApiResponse::json(201, &json!({ "data": created }))
            }
        }
    }

    fn insert(&mut self, path: &str, fields: Fields) -> Value {
        let id = self.allocate_id();
        let rendered = render(id, &fields);
        self.collections
            .entry(path.to_string())
            .or_default()
            .insert(id, fields);
        rendered
    }

    fn update(&mut self, path: &str, collection: &str, id: u64, body: Option<Value>) -> ApiResponse {
        if self.conflicted.contains(path) {
            return message(409, "record was modified");
        }
        let Some(Value::Object(changes)) = body else {
            return message(422, "body must be a JSON object");
        };
        match self.collections.get_mut(collection).and_then(|c| c.get_mut(&id)) {
            Some(fields) => {
                fields.extend(changes);
                ApiResponse::json(200, &json!({ "data": render(id, fields) }))
            }
            None => message(404, "not found"),
        }
    }

    fn destroy(&mut self, collection: &str, id: u64) -> ApiResponse {
        match self.collections.get_mut(collection).and_then(|c| c.remove(&id)) {
            Some(_) => ApiResponse::new(204, ""),
            None => message(404, "not found"),
        }
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn split_item(path: &str) -> Option<(&str, u64)> {
    let (collection, last) = path.rsplit_once('/')?;
    let id = last.parse().ok()?;
    (!collection.is_empty()).then_some((collection, id))
}

fn render(id: u64, fields: &Fields) -> Value {
    let mut object = fields.clone();
    object.insert("id".into(), json!(id));
    Value::Object(object)
}

fn text_eq(field: &Value, expected: &str) -> bool {
    match field {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}

fn message(status: u16, text: &str) -> ApiResponse {
    ApiResponse::json(status, &json!({ "message": text }))
}
