//! Transform context for variable resolution and interpolation.

use crate::document::Query;
use http::{request, response};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Regex for matching variable expressions like ${...}
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Context handed to every transformer alongside the document.
#[derive(Debug, Clone)]
pub struct TransformContext {
    /// Original request information
    pub request: RequestInfo,
    /// Response information (if in response phase)
    pub response: Option<ResponseInfo>,
    /// Captured groups from rule matching
    pub captures: HashMap<String, String>,
    /// Time the context was created
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Request information for context.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// HTTP method
    pub method: String,
    /// Request path (without query string)
    pub path: String,
    /// Query string as received (without leading ?)
    pub query_string: Option<String>,
    /// Parsed query parameters
    pub query: Query,
    /// Request headers, keyed by lowercase name
    pub headers: HashMap<String, Vec<String>>,
}

/// Response information for context.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    /// HTTP status code
    pub status: u16,
    /// Response headers, keyed by lowercase name
    pub headers: HashMap<String, Vec<String>>,
}

impl TransformContext {
    /// Create a new transform context.
    pub fn new(request: RequestInfo) -> Self {
        Self {
            request,
            response: None,
            captures: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Add response information to the context.
    pub fn with_response(mut self, response: ResponseInfo) -> Self {
        self.response = Some(response);
        self
    }

    /// Add captures to the context.
    pub fn with_captures(mut self, captures: HashMap<String, String>) -> Self {
        self.captures = captures;
        self
    }

    /// Resolve a variable expression.
    ///
    /// Supports:
    /// - `${request.method}`, `${request.path}`, `${request.query}`
    /// - `${request.header.X-Custom}` - Request header value
    /// - `${request.query_param.page}` - First query parameter value
    /// - `${response.status}`, `${response.header.Content-Type}`
    /// - `${captures.name}`, `${name}`, `${1}` - Rule captures
    /// - `${now}` - Context creation time (RFC 3339)
    pub fn resolve(&self, expr: &str) -> Option<String> {
        let (head, rest) = expr.split_once('.').unwrap_or((expr, ""));

        match head {
            "request" => self.resolve_request(rest),
            "response" => self.resolve_response(rest),
            "captures" => self.captures.get(rest).cloned(),
            "now" => Some(self.timestamp.to_rfc3339()),
            other => self.captures.get(other).cloned(),
        }
    }

    /// Interpolate all ${...} variables in a string.
    ///
    /// Unknown variables resolve to the empty string.
    pub fn interpolate(&self, template: &str) -> String {
        if !template.contains("${") {
            return template.to_string();
        }
        VAR_REGEX
            .replace_all(template, |caps: &regex::Captures| {
                self.resolve(&caps[1]).unwrap_or_default()
            })
            .into_owned()
    }

    fn resolve_request(&self, path: &str) -> Option<String> {
        let (head, rest) = path.split_once('.').unwrap_or((path, ""));

        match head {
            "method" => Some(self.request.method.clone()),
            "path" => Some(self.request.path.clone()),
            "query" => self.request.query_string.clone(),
            "header" => self.request.header(rest).map(str::to_string),
            "query_param" => {
                if self.request.query.contains(rest) {
                    Some(self.request.query.get_string(rest).to_string())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn resolve_response(&self, path: &str) -> Option<String> {
        let resp = self.response.as_ref()?;
        let (head, rest) = path.split_once('.').unwrap_or((path, ""));

        match head {
            "status" => Some(resp.status.to_string()),
            "header" => resp.header(rest).map(str::to_string),
            _ => None,
        }
    }
}

impl RequestInfo {
    /// Build request info from the request head.
    pub fn from_parts(parts: &request::Parts) -> Self {
        let query_string = parts.uri.query().map(str::to_string);
        let query = query_string.as_deref().map(Query::parse).unwrap_or_default();

        Self {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            query_string,
            query,
            headers: collect_headers(&parts.headers),
        }
    }

    /// Get a single header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        first_header(&self.headers, name)
    }
}

impl ResponseInfo {
    /// Build response info from the response head.
    pub fn from_parts(parts: &response::Parts) -> Self {
        Self {
            status: parts.status.as_u16(),
            headers: collect_headers(&parts.headers),
        }
    }

    /// Get a single header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        first_header(&self.headers, name)
    }
}

fn collect_headers(headers: &http::HeaderMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers {
        // Non-visible-ASCII header values are not addressable by name lookups
        if let Ok(value) = value.to_str() {
            out.entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    out
}

fn first_header<'a>(headers: &'a HashMap<String, Vec<String>>, name: &str) -> Option<&'a str> {
    headers
        .get(&name.to_lowercase())
        .and_then(|v| v.first())
        .map(|s| s.as_str())
}
