//! Declarative transformers built from configured rules.

use super::{Flow, Transformer};
use crate::config::ErrorPolicy;
use crate::context::TransformContext;
use crate::document::{Document, PathError, Query};
use crate::matcher::Condition;
use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{trace, warn};

/// Operation on a JSON body document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyOperation {
    /// Set a value at a path
    Set { path: String, value: JsonValue },
    /// Append a value to the list at a path, creating the list if absent
    Append { path: String, value: JsonValue },
    /// Delete values at paths
    Delete(Vec<String>),
    /// Copy a value from one path to another
    Copy { from: String, to: String },
    /// Move a value from one path to another
    Move { from: String, to: String },
}

/// Operation on a query document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOperation {
    /// Replace all values of a key
    Set { key: String, value: String },
    /// Add a value to a key
    Add { key: String, value: String },
    /// Remove keys
    Remove(Vec<String>),
}

/// An operation that can be applied to documents of type `D`.
pub trait Operation<D> {
    fn apply(&self, doc: &mut D, ctx: &TransformContext) -> Result<(), PathError>;
}

impl Operation<Document> for BodyOperation {
    fn apply(&self, doc: &mut Document, ctx: &TransformContext) -> Result<(), PathError> {
        match self {
            BodyOperation::Set { path, value } => {
                doc.set_value(path, interpolate_json_value(value, ctx))
            }
            BodyOperation::Append { path, value } => {
                doc.append(path, interpolate_json_value(value, ctx))
            }
            BodyOperation::Delete(paths) => {
                for path in paths {
                    doc.remove(path)?;
                }
                Ok(())
            }
            BodyOperation::Copy { from, to } => match doc.get(from) {
                Ok(value) => {
                    let value = value.clone();
                    doc.set_value(to, value)
                }
                Err(err) if err.is_not_found() => Ok(()),
                Err(err) => Err(err),
            },
            BodyOperation::Move { from, to } => match doc.remove(from)? {
                Some(value) => doc.set_value(to, value),
                None => Ok(()),
            },
        }
    }
}

impl Operation<Query> for QueryOperation {
    fn apply(&self, query: &mut Query, ctx: &TransformContext) -> Result<(), PathError> {
        match self {
            QueryOperation::Set { key, value } => query.set_string(key, ctx.interpolate(value)),
            QueryOperation::Add { key, value } => query.add(key, ctx.interpolate(value)),
            QueryOperation::Remove(keys) => {
                for key in keys {
                    query.remove(key);
                }
            }
        }
        Ok(())
    }
}

/// Interpolate variables in JSON string values.
fn interpolate_json_value(value: &JsonValue, ctx: &TransformContext) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(ctx.interpolate(s)),
        JsonValue::Array(arr) => {
            JsonValue::Array(arr.iter().map(|v| interpolate_json_value(v, ctx)).collect())
        }
        JsonValue::Object(obj) => JsonValue::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), interpolate_json_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// A configured rule: a condition plus operations applied in order.
pub struct RuleTransformer<Op> {
    name: String,
    condition: Option<Condition>,
    operations: Vec<Op>,
    on_error: ErrorPolicy,
}

impl<Op> RuleTransformer<Op> {
    pub fn new(
        name: impl Into<String>,
        condition: Option<Condition>,
        operations: Vec<Op>,
        on_error: ErrorPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            condition,
            operations,
            on_error,
        }
    }
}

#[async_trait]
impl<D, Op> Transformer<D> for RuleTransformer<Op>
where
    D: Send,
    Op: Operation<D> + Send + Sync,
{
    async fn transform(&self, ctx: &TransformContext, doc: &mut D) -> Flow {
        let captured;
        let ctx = match &self.condition {
            Some(condition) => match condition.matches(ctx) {
                Some(captures) if captures.is_empty() => ctx,
                Some(captures) => {
                    captured = ctx.clone().with_captures(captures);
                    &captured
                }
                None => {
                    trace!(rule = %self.name, "Rule condition not met");
                    return Flow::Continue;
                }
            },
            None => ctx,
        };

        for (index, operation) in self.operations.iter().enumerate() {
            if let Err(err) = operation.apply(doc, ctx) {
                match self.on_error {
                    ErrorPolicy::Abort => {
                        warn!(rule = %self.name, index, error = %err, "Rule operation failed, aborting");
                        return Flow::Abort(StatusCode::INTERNAL_SERVER_ERROR);
                    }
                    ErrorPolicy::Continue => {
                        warn!(rule = %self.name, index, error = %err, "Rule operation failed, continuing");
                    }
                }
            }
        }

        Flow::Continue
    }

    fn name(&self) -> &str {
        &self.name
    }
}
