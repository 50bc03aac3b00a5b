//! Wire message: `{ "<plugin>": { "<arg>": <value>, … }, … }`.
//!
//! Entry order follows the body's key order (`serde_json` is built with
//! `preserve_order`), so results can be aligned with the request.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("body must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("arguments for {plugin:?} must be a JSON object, got {found}")]
    PayloadNotAnObject { plugin: String, found: &'static str },
}

/// One requested invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub plugin: String,
    pub args: Map<String, Value>,
}

/// A decoded message: zero or more entries, in body order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    entries: Vec<Entry>,
}

impl Message {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    /// Decode a raw queue body.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(map) = value else {
            return Err(DecodeError::NotAnObject(kind_of(&value)));
        };

        let entries = map
            .into_iter()
            .map(|(plugin, payload)| match payload {
                Value::Object(args) => Ok(Entry { plugin, args }),
                other => Err(DecodeError::PayloadNotAnObject {
                    found: kind_of(&other),
                    plugin,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
