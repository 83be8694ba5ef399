//! Pages returned by list endpoints.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::RemoteRecord;
use crate::request::ApiRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Query parameter carrying a page index.
pub const PAGE_PARAM: &str = "page";
/// Query parameter carrying an opaque continuation token.
pub const CURSOR_PARAM: &str = "cursor";

/// Continuation cursor for the next page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cursor {
    /// One-based page index.
    Page(u64),
    /// Opaque token issued by the service.
    Token(String),
}

impl Cursor {
    /// Adds this cursor to a list request.
    pub fn apply(&self, request: ApiRequest) -> ApiRequest {
        match self {
            Cursor::Page(n) => request.with_query(PAGE_PARAM, n.to_string()),
            Cursor::Token(token) => request.with_query(CURSOR_PARAM, token.clone()),
        }
    }

    /// Parses a `links.next` value.
    ///
    /// A link with a numeric `page` query parameter becomes a page index;
    /// anything else is kept as an opaque token.
    pub fn from_link(link: &str) -> Self {
        let page = link.split_once('?').and_then(|(_, query)| {
            query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == PAGE_PARAM)
                .and_then(|(_, value)| value.parse::<u64>().ok())
        });
        match page {
            Some(n) => Cursor::Page(n),
            None => Cursor::Token(link.to_string()),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Page(n) => write!(f, "page {n}"),
            Cursor::Token(token) => write!(f, "token {token}"),
        }
    }
}

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Records in service order.
    pub records: Vec<RemoteRecord>,
    /// Cursor for the following page, `None` on the last page.
    pub next: Option<Cursor>,
    /// Total record count reported by the service.
    pub total_hint: Option<u64>,
}

impl Page {
    /// Creates a page.
    pub fn new(records: Vec<RemoteRecord>, next: Option<Cursor>) -> Self {
        Self {
            records,
            next,
            total_hint: None,
        }
    }

    /// Returns true if the page holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if no further page follows.
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }

    /// Decodes a response envelope.
    ///
    /// Records are read from `data` (an array, or a single object). The next
    /// cursor comes from `links.next`, falling back to
    /// `meta.current_page`/`meta.last_page`. `meta.total` is the count hint.
    pub fn from_envelope(envelope: &Value) -> ProtocolResult<Self> {
        let data = envelope
            .get("data")
            .ok_or_else(|| ProtocolError::decode("response envelope has no `data` field"))?;

        let records = match data {
            Value::Array(items) => items
                .iter()
                .cloned()
                .map(RemoteRecord::from_value)
                .collect::<ProtocolResult<Vec<_>>>()?,
            Value::Object(_) => vec![RemoteRecord::from_value(data.clone())?],
            Value::Null => Vec::new(),
            _ => return Err(ProtocolError::decode("`data` is neither a list nor a record")),
        };

        let meta = envelope.get("meta");
        let next = match envelope.pointer("/links/next") {
            Some(Value::String(link)) if !link.is_empty() => Some(Cursor::from_link(link)),
            _ => {
                let current = meta.and_then(|m| m.get("current_page")).and_then(Value::as_u64);
                let last = meta.and_then(|m| m.get("last_page")).and_then(Value::as_u64);
                match (current, last) {
                    (Some(current), Some(last)) if current < last => Some(Cursor::Page(current + 1)),
                    _ => None,
                }
            }
        };
        let total_hint = meta.and_then(|m| m.get("total")).and_then(Value::as_u64);

        Ok(Self {
            records,
            next,
            total_hint,
        })
    }
}
