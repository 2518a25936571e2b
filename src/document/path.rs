//! Dot-delimited paths into a JSON document.
//!
//! Supports: `field`, `field.subfield`, `items[0]`, `items[0].name`, and
//! `items.0` (a digit segment indexes a list, or keys a map). There is no
//! escaping for literal dots.

use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Most `null` slots a single indexed set may pad onto a list.
pub const MAX_LIST_PADDING: usize = 1024;

/// Errors raised while parsing or walking a path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("invalid path '{path}': {reason}")]
    Syntax { path: String, reason: String },

    #[error("path '{path}' not found")]
    NotFound { path: String },

    #[error("cannot route '{path}' through {found}, want {expected}")]
    Type {
        path: String,
        found: &'static str,
        expected: &'static str,
    },
}

impl PathError {
    fn syntax(path: &str, reason: impl Into<String>) -> Self {
        Self::Syntax {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error only reports an absent value.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A single path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Map key (or list index when it is all digits and the container is a list)
    Field(String),
    /// Explicit list index from `[N]`
    Index(usize),
}

impl Segment {
    /// List index addressed by this segment, if any.
    fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(idx) => Some(*idx),
            Segment::Field(key) if !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()) => {
                key.parse().ok()
            }
            Segment::Field(_) => None,
        }
    }

    /// Empty container to create when this segment is walked into and absent.
    fn empty_container(&self) -> JsonValue {
        match self {
            Segment::Index(_) => JsonValue::Array(Vec::new()),
            Segment::Field(_) => JsonValue::Object(serde_json::Map::new()),
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            Segment::Index(_) => "array",
            Segment::Field(_) => "object",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Field(key) => f.write_str(key),
            Segment::Index(idx) => write!(f, "[{}]", idx),
        }
    }
}

/// A parsed path: a non-empty ordered list of segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    raw: String,
    segments: Vec<Segment>,
}

impl Path {
    /// Parse a dot-delimited path.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        if path.is_empty() {
            return Err(PathError::syntax(path, "path is empty"));
        }

        let mut segments = Vec::new();

        for part in path.split('.') {
            let (key, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };

            if key.is_empty() && rest.is_empty() {
                return Err(PathError::syntax(path, "empty segment"));
            }
            if !key.is_empty() {
                segments.push(Segment::Field(key.to_string()));
            }

            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .ok_or_else(|| PathError::syntax(path, "unterminated '['"))?;
                let idx_str = rest.get(1..close).unwrap_or_default();
                let idx = idx_str.parse::<usize>().map_err(|_| {
                    PathError::syntax(path, format!("invalid index '{}'", idx_str))
                })?;
                segments.push(Segment::Index(idx));

                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(PathError::syntax(
                        path,
                        format!("unexpected '{}' after index", rest),
                    ));
                }
            }
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn not_found(&self) -> PathError {
        PathError::NotFound {
            path: self.raw.clone(),
        }
    }

    fn type_error(&self, found: &JsonValue, segment: &Segment) -> PathError {
        PathError::Type {
            path: self.raw.clone(),
            found: kind_of(found),
            expected: segment.expected(),
        }
    }

    /// Resolve this path against `root` without modifying it.
    pub fn get<'a>(&self, root: &'a JsonValue) -> Result<&'a JsonValue, PathError> {
        let mut current = root;

        for segment in &self.segments {
            current = match current {
                JsonValue::Object(map) => match segment {
                    Segment::Field(key) => map.get(key).ok_or_else(|| self.not_found())?,
                    Segment::Index(_) => return Err(self.type_error(current, segment)),
                },
                JsonValue::Array(items) => {
                    let idx = segment.as_index().ok_or_else(|| PathError::Type {
                        path: self.raw.clone(),
                        found: "array",
                        expected: "object",
                    })?;
                    items.get(idx).ok_or_else(|| self.not_found())?
                }
                JsonValue::Null => return Err(self.not_found()),
                scalar => return Err(self.type_error(scalar, segment)),
            };
        }

        Ok(current)
    }

    /// Resolve this path mutably without creating anything.
    pub fn get_mut<'a>(&self, root: &'a mut JsonValue) -> Result<&'a mut JsonValue, PathError> {
        let mut current = root;

        for segment in &self.segments {
            current = match current {
                JsonValue::Object(map) => match segment {
                    Segment::Field(key) => map.get_mut(key).ok_or_else(|| self.not_found())?,
                    Segment::Index(_) => {
                        return Err(PathError::Type {
                            path: self.raw.clone(),
                            found: "object",
                            expected: "array",
                        })
                    }
                },
                JsonValue::Array(items) => {
                    let idx = segment.as_index().ok_or_else(|| PathError::Type {
                        path: self.raw.clone(),
                        found: "array",
                        expected: "object",
                    })?;
                    items.get_mut(idx).ok_or_else(|| self.not_found())?
                }
                JsonValue::Null => return Err(self.not_found()),
                scalar => return Err(self.type_error(scalar, segment)),
            };
        }

        Ok(current)
    }

    /// Assign `value` at this path, creating intermediate containers.
    ///
    /// Missing or `null` intermediates become a list when the following
    /// segment is an index, otherwise a map. Indexing at or past the end of
    /// a list extends it, padding with `null`.
    pub fn set(&self, root: &mut JsonValue, value: JsonValue) -> Result<(), PathError> {
        let (last, parents) = self
            .segments
            .split_last()
            .ok_or_else(|| PathError::syntax(&self.raw, "path is empty"))?;

        let mut current = root;
        for (i, segment) in parents.iter().enumerate() {
            let next = &self.segments[i + 1];
            let child = self.slot(current, segment)?;
            if child.is_null() {
                *child = next.empty_container();
            }
            current = child;
        }

        *self.slot(current, last)? = value;
        Ok(())
    }

    /// Remove the value at this path, returning it.
    pub fn remove(&self, root: &mut JsonValue) -> Result<Option<JsonValue>, PathError> {
        let (last, parents) = self
            .segments
            .split_last()
            .ok_or_else(|| PathError::syntax(&self.raw, "path is empty"))?;

        let parent_path = Path {
            raw: self.raw.clone(),
            segments: parents.to_vec(),
        };
        let parent = match parent_path.get_mut(root) {
            Ok(parent) => parent,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };

        match (parent, last) {
            (JsonValue::Object(map), Segment::Field(key)) => Ok(map.remove(key)),
            (JsonValue::Array(items), segment) => match segment.as_index() {
                Some(idx) if idx < items.len() => Ok(Some(items.remove(idx))),
                Some(_) => Ok(None),
                None => Err(PathError::Type {
                    path: self.raw.clone(),
                    found: "array",
                    expected: "object",
                }),
            },
            (JsonValue::Null, _) => Ok(None),
            (other, segment) => Err(self.type_error(other, segment)),
        }
    }

    /// Get (or make room for) the slot addressed by `segment` inside `current`.
    fn slot<'a>(
        &self,
        current: &'a mut JsonValue,
        segment: &Segment,
    ) -> Result<&'a mut JsonValue, PathError> {
        match current {
            JsonValue::Object(map) => match segment {
                Segment::Field(key) => Ok(map.entry(key.clone()).or_insert(JsonValue::Null)),
                Segment::Index(_) => Err(PathError::Type {
                    path: self.raw.clone(),
                    found: "object",
                    expected: "array",
                }),
            },
            JsonValue::Array(items) => {
                let idx = segment.as_index().ok_or_else(|| PathError::Type {
                    path: self.raw.clone(),
                    found: "array",
                    expected: "object",
                })?;
                if items.len() <= idx {
                    let len = idx
                        .checked_add(1)
                        .filter(|len| len - items.len() <= MAX_LIST_PADDING)
                        .ok_or_else(|| {
                            PathError::syntax(
                                &self.raw,
                                format!(
                                    "index {} is too far past the end of a list of length {}",
                                    idx,
                                    items.len()
                                ),
                            )
                        })?;
                    items.resize(len, JsonValue::Null);
                }
                Ok(&mut items[idx])
            }
            other => Err(self.type_error(other, segment)),
        }
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Name of a JSON value's type, for error messages.
pub fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
