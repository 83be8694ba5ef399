//! JSON Schema checks for outbound bodies.

use crate::error::{ProtocolError, ProtocolResult};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A compiled JSON Schema that request bodies must satisfy.
///
/// The draft is taken from the schema's `$schema` keyword.
#[derive(Clone)]
pub struct BodySchema {
    source: Value,
    compiled: Arc<JSONSchema>,
}

impl BodySchema {
    /// Compiles a schema document.
    pub fn new(source: Value) -> ProtocolResult<Self> {
        let compiled = JSONSchema::compile(&source)
            .map_err(|e| ProtocolError::validation(format!("invalid schema: {e}")))?;
        Ok(Self {
            source,
            compiled: Arc::new(compiled),
        })
    }

    /// Parses and compiles a schema from JSON text.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        Self::new(serde_json::from_str(text)?)
    }

    /// Returns the schema document.
    pub fn source(&self) -> &Value {
        &self.source
    }

    /// Checks a body, listing every violation in the error.
    pub fn validate(&self, body: &Value) -> ProtocolResult<()> {
        let violations: Vec<String> = match self.compiled.validate(body) {
            Ok(()) => return Ok(()),
            Err(errors) => errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{path}: {error}")
                    }
                })
                .collect(),
        };
        Err(ProtocolError::validation(format!(
            "body does not match schema: {}",
            violations.join("; ")
        )))
    }
}

impl fmt::Debug for BodySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodySchema")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BodySchema {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for BodySchema {}
