//! Rule conditions: which requests a declarative rule applies to.

use crate::config::{PathMatcher, PatternType, RuleMatcher};
use crate::context::TransformContext;
use glob::Pattern as GlobPattern;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

/// Errors compiling a condition.
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid glob: {0}")]
    Glob(#[from] glob::PatternError),
}

/// Compiled path pattern.
#[derive(Debug)]
pub enum PathPattern {
    /// Exact string match
    Exact(String),
    /// Glob pattern match
    Glob(GlobPattern),
    /// Regex pattern match
    Regex(Regex),
}

impl PathPattern {
    /// Compile a path pattern from configuration.
    pub fn compile(config: &PathMatcher) -> Result<Self, MatcherError> {
        match config.pattern_type {
            PatternType::Exact => Ok(Self::Exact(config.pattern.clone())),
            PatternType::Glob => Ok(Self::Glob(GlobPattern::new(&config.pattern)?)),
            PatternType::Regex => Ok(Self::Regex(Regex::new(&config.pattern)?)),
        }
    }

    /// Match `path`, returning regex captures on success.
    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        match self {
            Self::Exact(pattern) => (path == pattern).then(HashMap::new),
            Self::Glob(pattern) => pattern.matches(path).then(HashMap::new),
            Self::Regex(regex) => {
                let caps = regex.captures(path)?;
                let mut captures = HashMap::new();

                for (i, m) in caps.iter().enumerate() {
                    if let Some(m) = m {
                        captures.insert(i.to_string(), m.as_str().to_string());
                    }
                }
                for name in regex.capture_names().flatten() {
                    if let Some(m) = caps.name(name) {
                        captures.insert(name.to_string(), m.as_str().to_string());
                    }
                }

                Some(captures)
            }
        }
    }
}

/// All conditions of a rule; every one present must hold.
#[derive(Debug, Default)]
pub struct Condition {
    path: Option<PathPattern>,
    /// Uppercased allowed methods
    methods: Option<Vec<String>>,
}

impl Condition {
    pub fn compile(config: &RuleMatcher) -> Result<Self, MatcherError> {
        let path = config.path.as_ref().map(PathPattern::compile).transpose()?;
        let methods = config
            .methods
            .as_ref()
            .map(|methods| methods.iter().map(|m| m.to_uppercase()).collect());

        Ok(Self { path, methods })
    }

    /// Check the request against this condition, returning captures on match.
    pub fn matches(&self, ctx: &TransformContext) -> Option<HashMap<String, String>> {
        if let Some(methods) = &self.methods {
            if !methods.contains(&ctx.request.method.to_uppercase()) {
                return None;
            }
        }

        match &self.path {
            Some(pattern) => pattern.matches(&ctx.request.path),
            None => Some(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestInfo;

    fn make_context(method: &str, path: &str) -> TransformContext {
        let (parts, _) = http::Request::builder()
            .method(method)
            .uri(path)
            .body(())
            .unwrap()
            .into_parts();
        TransformContext::new(RequestInfo::from_parts(&parts))
    }

    fn path_matcher(pattern: &str, pattern_type: PatternType) -> RuleMatcher {
        RuleMatcher {
            path: Some(PathMatcher {
                pattern: pattern.to_string(),
                pattern_type,
            }),
            methods: None,
        }
    }

    #[test]
    fn test_exact_match() {
        let cond = Condition::compile(&path_matcher("/api/users", PatternType::Exact)).unwrap();
        assert!(cond.matches(&make_context("GET", "/api/users")).is_some());
        assert!(cond.matches(&make_context("GET", "/api/users/1")).is_none());
    }

    #[test]
    fn test_glob_match() {
        let cond = Condition::compile(&path_matcher("/api/*/items", PatternType::Glob)).unwrap();
        assert!(cond.matches(&make_context("GET", "/api/v1/items")).is_some());
        assert!(cond.matches(&make_context("GET", "/other/v1/items")).is_none());
    }

    #[test]
    fn test_regex_captures() {
        let cond = Condition::compile(&path_matcher(
            r"^/api/(?P<resource>\w+)/(\d+)$",
            PatternType::Regex,
        ))
        .unwrap();

        let captures = cond.matches(&make_context("GET", "/api/users/42")).unwrap();
        assert_eq!(captures.get("resource").map(String::as_str), Some("users"));
        assert_eq!(captures.get("1").map(String::as_str), Some("users"));
        assert_eq!(captures.get("2").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_methods() {
        let cond = Condition::compile(&RuleMatcher {
            path: None,
            methods: Some(vec!["post".to_string(), "PUT".to_string()]),
        })
        .unwrap();

        assert!(cond.matches(&make_context("POST", "/x")).is_some());
        assert!(cond.matches(&make_context("PUT", "/x")).is_some());
        assert!(cond.matches(&make_context("GET", "/x")).is_none());
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(
            Condition::compile(&path_matcher("(", PatternType::Regex)),
            Err(MatcherError::Regex(_))
        ));
        assert!(matches!(
            Condition::compile(&path_matcher("[", PatternType::Glob)),
            Err(MatcherError::Glob(_))
        ));
    }
}
