//! Configuration types for declarative transform pipelines.

use crate::document::{Document, Query};
use crate::matcher::{Condition, MatcherError};
use crate::middleware::{
    transform_body, transform_query, transform_response_body, TransformBodyLayer,
    TransformQueryLayer, TransformResponseBodyLayer,
};
use crate::transformer::{BodyOperation, QueryOperation, RuleTransformer, TransformerChain};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Default maximum body size buffered for transformation (10MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Main configuration: one rule list per interception point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Configuration version
    pub version: String,
    /// Global settings
    pub settings: Settings,
    /// Rules applied to the request query string
    pub query: Vec<Rule<QueryOperation>>,
    /// Rules applied to the JSON request body
    pub request_body: Vec<Rule<BodyOperation>>,
    /// Rules applied to the JSON response body
    pub response_body: Vec<Rule<BodyOperation>>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: Settings::default(),
            query: vec![],
            request_body: vec![],
            response_body: vec![],
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum body size to buffer for transformation (bytes)
    pub max_body_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// A transform rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "Op: Serialize", deserialize = "Op: Deserialize<'de>"))]
pub struct Rule<Op> {
    /// Rule name (for logging/debugging)
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: String,
    /// Whether the rule is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Matching conditions; absent means always
    #[serde(default)]
    pub when: Option<RuleMatcher>,
    /// Operations to apply in order, each a single-key map (`- set: {...}`)
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub operations: Vec<Op>,
    /// What to do when an operation fails
    #[serde(default)]
    pub on_error: ErrorPolicy,
}

fn default_true() -> bool {
    true
}

/// Behavior when an operation fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort the chain with 500
    #[default]
    Abort,
    /// Log and move on to the next operation
    Continue,
}

/// Matching conditions for a rule.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuleMatcher {
    /// Path matching
    #[serde(default)]
    pub path: Option<PathMatcher>,
    /// HTTP methods to match
    #[serde(default)]
    pub methods: Option<Vec<String>>,
}

/// Path matcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathMatcher {
    /// The pattern to match
    pub pattern: String,
    /// Match type: exact, glob, regex
    #[serde(default, rename = "type")]
    pub pattern_type: PatternType,
}

/// Pattern matching type.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Exact string match
    Exact,
    /// Glob pattern (*, ?)
    Glob,
    /// Regular expression
    #[default]
    Regex,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rule '{rule}': {source}")]
    Rule {
        rule: String,
        #[source]
        source: MatcherError,
    },
}

/// Compiled transformer chains, one per interception point.
pub struct Pipelines {
    pub settings: Settings,
    pub query: TransformerChain<Query>,
    pub request_body: TransformerChain<Document>,
    pub response_body: TransformerChain<Document>,
}

impl TransformConfig {
    /// Parse from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Compile every enabled rule into its chain, keeping rule order.
    pub fn build(&self) -> Result<Pipelines, ConfigError> {
        let pipelines = Pipelines {
            settings: self.settings.clone(),
            query: build_chain(&self.query)?,
            request_body: build_chain(&self.request_body)?,
            response_body: build_chain(&self.response_body)?,
        };

        info!(
            query_rules = pipelines.query.len(),
            request_body_rules = pipelines.request_body.len(),
            response_body_rules = pipelines.response_body.len(),
            "Transform pipelines built"
        );

        Ok(pipelines)
    }
}

impl Pipelines {
    /// Layer rewriting the request query with the query chain.
    pub fn query_layer(&self) -> TransformQueryLayer<TransformerChain<Query>> {
        transform_query(self.query.clone())
    }

    /// Layer rewriting the JSON request body with the request body chain.
    pub fn request_body_layer(&self) -> TransformBodyLayer<TransformerChain<Document>> {
        transform_body(self.request_body.clone()).max_body_size(self.settings.max_body_size)
    }

    /// Layer rewriting the JSON response body with the response body chain.
    pub fn response_body_layer(&self) -> TransformResponseBodyLayer<TransformerChain<Document>> {
        transform_response_body(self.response_body.clone())
            .max_body_size(self.settings.max_body_size)
    }
}

fn build_chain<D, Op>(rules: &[Rule<Op>]) -> Result<TransformerChain<D>, ConfigError>
where
    D: Send + 'static,
    Op: Clone + Send + Sync + 'static,
    RuleTransformer<Op>: crate::transformer::Transformer<D>,
{
    let mut chain = TransformerChain::new();

    for rule in rules {
        if !rule.enabled {
            debug!(rule = %rule.name, "Skipping disabled rule");
            continue;
        }

        let condition = rule
            .when
            .as_ref()
            .map(Condition::compile)
            .transpose()
            .map_err(|source| ConfigError::Rule {
                rule: rule.name.clone(),
                source,
            })?;

        chain.push(RuleTransformer::new(
            rule.name.clone(),
            condition,
            rule.operations.clone(),
            rule.on_error,
        ));
    }

    Ok(chain)
}
