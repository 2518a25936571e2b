//! Addressable documents: decoded request/response bodies and queries.

mod path;
pub mod query;

pub use path::{kind_of, Path, PathError, Segment, MAX_LIST_PADDING};
pub use query::Query;

use bytes::Bytes;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Errors decoding or encoding a [`Document`].
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("JSON decode error: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("JSON body must be an object, found {0}")]
    NotAnObject(&'static str),

    #[error("JSON encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A decoded JSON object body, mutated in place by path.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Always a `JsonValue::Object`
    root: JsonValue,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self {
            root: JsonValue::Object(Map::new()),
        }
    }

    /// Decode a JSON object from bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DocumentError> {
        let value: JsonValue = serde_json::from_slice(bytes).map_err(DocumentError::Decode)?;
        Self::try_from(value)
    }

    /// Encode the document back to JSON bytes.
    pub fn to_bytes(&self) -> Result<Bytes, DocumentError> {
        serde_json::to_vec(&self.root)
            .map(Bytes::from)
            .map_err(DocumentError::Encode)
    }

    /// Look up the value at `path`.
    pub fn get(&self, path: &str) -> Result<&JsonValue, PathError> {
        Path::parse(path)?.get(&self.root)
    }

    /// Look up the value at `path` mutably.
    pub fn get_mut(&mut self, path: &str) -> Result<&mut JsonValue, PathError> {
        Path::parse(path)?.get_mut(&mut self.root)
    }

    /// The string at `path`, if present and a string.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).ok().and_then(JsonValue::as_str)
    }

    /// The string at `path`, or `""` when absent or not a string.
    pub fn get_string(&self, path: &str) -> String {
        self.get_str(path).unwrap_or_default().to_string()
    }

    /// Whether `path` resolves to a value (including `null` leaves).
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    /// Assign `value` at `path`, creating intermediate containers.
    pub fn set_value(&mut self, path: &str, value: JsonValue) -> Result<(), PathError> {
        Path::parse(path)?.set(&mut self.root, value)
    }

    /// Assign a string scalar at `path`.
    pub fn set_string(&mut self, path: &str, value: impl Into<String>) -> Result<(), PathError> {
        self.set_value(path, JsonValue::String(value.into()))
    }

    /// Append `value` to the list at `path`.
    ///
    /// An absent path is treated as an empty list, so the list is created.
    /// A present value that is not a list is a type error and is left as is.
    pub fn append(&mut self, path: &str, value: JsonValue) -> Result<(), PathError> {
        let parsed = Path::parse(path)?;

        match parsed.get_mut(&mut self.root) {
            Ok(JsonValue::Array(items)) => {
                items.push(value);
                return Ok(());
            }
            Ok(other) => {
                return Err(PathError::Type {
                    path: path.to_string(),
                    found: kind_of(other),
                    expected: "array",
                })
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        parsed.set(&mut self.root, JsonValue::Array(vec![value]))
    }

    /// Append a map entry to the list at `path`.
    pub fn append_map(
        &mut self,
        path: &str,
        value: Map<String, JsonValue>,
    ) -> Result<(), PathError> {
        self.append(path, JsonValue::Object(value))
    }

    /// Remove the value at `path`, returning it if it existed.
    pub fn remove(&mut self, path: &str) -> Result<Option<JsonValue>, PathError> {
        Path::parse(path)?.remove(&mut self.root)
    }

    pub fn as_value(&self) -> &JsonValue {
        &self.root
    }

    pub fn into_value(self) -> JsonValue {
        self.root
    }
}

impl TryFrom<JsonValue> for Document {
    type Error = DocumentError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Object(_) => Ok(Self { root: value }),
            other => Err(DocumentError::NotAnObject(kind_of(&other))),
        }
    }
}

impl From<Map<String, JsonValue>> for Document {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self {
            root: JsonValue::Object(map),
        }
    }
}
