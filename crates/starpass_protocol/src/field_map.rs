//! Mapping between local records and a remote collection.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::{LocalRecord, RemoteId, RemoteRecord};
use crate::schema::BodySchema;
use crate::Fields;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Describes where and how local records are written.
///
/// The collection path may contain `{field}` placeholders, e.g.
/// `/needs/{need_id}/shifts`. Placeholders are filled from the local record
/// and are not sent in the body.
///
/// With no explicit mappings every pushed field keeps its name. Once any
/// mapping is added, only mapped fields cross the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    collection: String,
    local_to_remote: BTreeMap<String, String>,
    required: BTreeSet<String>,
    schema: Option<BodySchema>,
}

impl FieldMap {
    /// Creates an identity mapping for a collection path.
    pub fn new(collection: impl Into<String>) -> Self {
        let collection = collection.into();
        let collection = if collection.starts_with('/') {
            collection
        } else {
            format!("/{collection}")
        };
        Self {
            collection: collection.trim_end_matches('/').to_string(),
            local_to_remote: BTreeMap::new(),
            required: BTreeSet::new(),
            schema: None,
        }
    }

    /// Maps a local field name onto a remote one.
    pub fn map(mut self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.local_to_remote.insert(local.into(), remote.into());
        self
    }

    /// Marks a local field as required before dispatch.
    pub fn require(mut self, local: impl Into<String>) -> Self {
        self.required.insert(local.into());
        self
    }

    /// Requires outbound bodies to satisfy a JSON Schema.
    pub fn with_schema(mut self, schema: BodySchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Returns the body schema, if any.
    pub fn schema(&self) -> Option<&BodySchema> {
        self.schema.as_ref()
    }

    /// Returns the collection path template.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the placeholder field names in the collection template.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut rest = self.collection.as_str();
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            names.push(&rest[start + 1..start + len]);
            rest = &rest[start + len + 1..];
        }
        names
    }

    /// Returns true if the collection path has placeholders.
    pub fn is_templated(&self) -> bool {
        !self.placeholders().is_empty()
    }

    /// Resolves the collection path for a record.
    pub fn collection_path(&self, record: &LocalRecord) -> ProtocolResult<String> {
        let mut path = self.collection.clone();
        for name in self.placeholders() {
            let segment = record
                .get(name)
                .and_then(path_segment)
                .ok_or_else(|| {
                    ProtocolError::validation(format!(
                        "path field `{name}` is missing or not a plain value"
                    ))
                })?;
            path = path.replace(&format!("{{{name}}}"), &segment);
        }
        Ok(path)
    }

    /// Resolves the item path for a record with a known remote id.
    pub fn item_path(&self, record: &LocalRecord, id: &RemoteId) -> ProtocolResult<String> {
        Ok(format!("{}/{}", self.collection_path(record)?, id))
    }

    /// Checks required fields, path placeholders and the body schema.
    pub fn validate(&self, record: &LocalRecord) -> ProtocolResult<()> {
        for field in &self.required {
            match record.get(field) {
                None | Some(Value::Null) => {
                    return Err(ProtocolError::validation(format!(
                        "required field `{field}` is missing"
                    )))
                }
                Some(Value::String(s)) if s.trim().is_empty() => {
                    return Err(ProtocolError::validation(format!(
                        "required field `{field}` is empty"
                    )))
                }
                _ => {}
            }
        }
        self.collection_path(record)?;
        if let Some(schema) = &self.schema {
            schema.validate(&Value::Object(self.outbound(record)))?;
        }
        Ok(())
    }

    /// Builds the outbound body fields for a record.
    pub fn outbound(&self, record: &LocalRecord) -> Fields {
        let placeholders = self.placeholders();
        record
            .fields
            .iter()
            .filter(|(name, _)| record.is_pushed(name) && !placeholders.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                self.remote_name(name)
                    .map(|remote| (remote.to_string(), value.clone()))
            })
            .collect()
    }

    /// Maps a remote record into the local representation.
    pub fn inbound(&self, remote: &RemoteRecord) -> LocalRecord {
        let fields = if self.local_to_remote.is_empty() {
            remote.fields.clone()
        } else {
            self.local_to_remote
                .iter()
                .filter_map(|(local, remote_name)| {
                    remote
                        .get(remote_name)
                        .map(|value| (local.clone(), value.clone()))
                })
                .collect()
        };
        LocalRecord::new(fields).with_remote_id(remote.id.clone())
    }

    /// Returns true if every outbound field already has the same value remotely.
    pub fn matches_remote(&self, outbound: &Fields, remote: &RemoteRecord) -> bool {
        outbound.iter().all(|(name, value)| {
            remote
                .get(name)
                .map_or(value.is_null(), |remote_value| values_match(value, remote_value))
        })
    }

    fn remote_name<'a>(&'a self, local: &'a str) -> Option<&'a str> {
        if self.local_to_remote.is_empty() {
            Some(local)
        } else {
            self.local_to_remote.get(local).map(String::as_str)
        }
    }
}

/// Compares two field values, treating numeric text and numbers as equal.
pub fn values_match(local: &Value, remote: &Value) -> bool {
    match (local, remote) {
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim() == n.to_string()
                || s.trim().parse::<f64>().ok() == n.as_f64()
        }
        (a, b) => a == b,
    }
}

fn path_segment(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty() && !text.contains('/')).then_some(text)
}
