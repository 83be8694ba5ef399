//! Remote and local record representations.

use crate::error::{ProtocolError, ProtocolResult};
use crate::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Remote-assigned record identifier.
///
/// The service returns numeric ids; they are kept as text so path building
/// and comparisons do not depend on the JSON number representation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    /// Creates an id from text.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Reads an id from a JSON string or integer.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self(s.trim().to_string())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Returns the id as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<u64> for RemoteId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// A record as returned by the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRecord {
    /// Remote id.
    pub id: RemoteId,
    /// All fields except `id`.
    pub fields: Fields,
}

impl RemoteRecord {
    /// Creates a remote record.
    pub fn new(id: impl Into<RemoteId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Builds a record from a JSON object carrying an `id` field.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::decode("record is not a JSON object"));
        };
        let id = fields
            .remove("id")
            .as_ref()
            .and_then(RemoteId::from_value)
            .ok_or_else(|| ProtocolError::decode("record has no usable id"))?;
        Ok(Self { id, fields })
    }

    /// Returns a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// A caller-supplied record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Remote id, present if the record was synced before.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,
    /// Field values.
    pub fields: Fields,
    /// Fields the caller intends to push. `None` pushes every field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_fields: Option<BTreeSet<String>>,
}

impl LocalRecord {
    /// Creates a record with no remote id.
    pub fn new(fields: Fields) -> Self {
        Self {
            remote_id: None,
            fields,
            push_fields: None,
        }
    }

    /// Creates a record from a JSON object. An `id` field becomes the remote id.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::validation("record is not a JSON object"));
        };
        let remote_id = fields.remove("id").as_ref().and_then(RemoteId::from_value);
        Ok(Self {
            remote_id,
            fields,
            push_fields: None,
        })
    }

    /// Sets the remote id.
    pub fn with_remote_id(mut self, id: impl Into<RemoteId>) -> Self {
        self.remote_id = Some(id.into());
        self
    }

    /// Restricts the pushed fields.
    pub fn only_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Sets a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns true if `field` is selected for pushing.
    pub fn is_pushed(&self, field: &str) -> bool {
        self.push_fields
            .as_ref()
            .map_or(true, |selected| selected.contains(field))
    }
}
