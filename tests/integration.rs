//! Integration tests for the interception layers.

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{Request, Response, StatusCode};
use serde_json::{json, Map, Value as JsonValue};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::{service_fn, Service, ServiceBuilder, ServiceExt};
use zentinel_mitm::middleware::echo;
use zentinel_mitm::{
    transform_body, transform_query, transform_response_body, transformer_fn, Document, Flow,
    Query, TransformConfig, TransformContext, TransformerChain,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn post(uri: &str, body: &str) -> Request<Bytes> {
    Request::post(uri)
        .header(CONTENT_LENGTH, body.len())
        .body(Bytes::copy_from_slice(body.as_bytes()))
        .unwrap()
}

fn json_body(response: &Response<Bytes>) -> JsonValue {
    serde_json::from_slice(response.body()).unwrap()
}

fn entry(key: &str, value: &str) -> Map<String, JsonValue> {
    let mut map = Map::new();
    map.insert("key".to_string(), json!(key));
    map.insert("value".to_string(), json!(value));
    map
}

/// Inner service answering with the request URI.
async fn reflect_uri(request: Request<Bytes>) -> Result<Response<Bytes>, Infallible> {
    Ok(Response::new(Bytes::from(request.uri().to_string())))
}

// =============================================================================
// Request Body Tests
// =============================================================================

#[tokio::test]
async fn test_set_string_through_echo() {
    init_tracing();

    let service = ServiceBuilder::new()
        .layer(transform_body(transformer_fn(
            |_ctx: &TransformContext, body: &mut Document| {
                Flow::abort_on_error(body.set_string("foo.bar", "baz"))
            },
        )))
        .service(echo());

    let response = service
        .oneshot(post("/", r#"{"foo": {"bar": ""}}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(&response), json!({"foo": {"bar": "baz"}}));
}

#[tokio::test]
async fn test_append_map_to_existing_list() {
    init_tracing();

    let service = ServiceBuilder::new()
        .layer(transform_body(transformer_fn(
            |_ctx: &TransformContext, body: &mut Document| {
                Flow::abort_on_error(body.append_map("foo.bar", entry("foo-1", "bar-1")))
            },
        )))
        .service(echo());

    let response = service
        .oneshot(post(
            "/",
            r#"{"foo": {"bar": [{"key": "foo-0", "value": "bar-0"}]}}"#,
        ))
        .await
        .unwrap();

    assert_eq!(
        json_body(&response),
        json!({"foo": {"bar": [
            {"key": "foo-0", "value": "bar-0"},
            {"key": "foo-1", "value": "bar-1"}
        ]}})
    );
}

#[tokio::test]
async fn test_append_map_creates_list() {
    init_tracing();

    let service = ServiceBuilder::new()
        .layer(transform_body(transformer_fn(
            |_ctx: &TransformContext, body: &mut Document| {
                Flow::abort_on_error(body.append_map("foo.bar", entry("foo-0", "bar-0")))
            },
        )))
        .service(echo());

    let response = service
        .oneshot(post("/", r#"{"foo": {"baz": "bar"}}"#))
        .await
        .unwrap();

    assert_eq!(
        json_body(&response),
        json!({"foo": {"baz": "bar", "bar": [{"key": "foo-0", "value": "bar-0"}]}})
    );
}

#[tokio::test]
async fn test_malformed_body_never_reaches_transformer() {
    init_tracing();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let service = ServiceBuilder::new()
        .layer(transform_body(transformer_fn(
            move |_ctx: &TransformContext, _body: &mut Document| {
                counter.fetch_add(1, Ordering::SeqCst);
                Flow::Continue
            },
        )))
        .service(echo());

    let response = service.oneshot(post("/", "{\"foo\": ")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_get_string_reads_request_values() {
    init_tracing();

    let service = ServiceBuilder::new()
        .layer(transform_body(transformer_fn(
            |_ctx: &TransformContext, body: &mut Document| {
                let user = body.get_string("user.name");
                let missing = body.get_string("user.nickname");
                Flow::abort_on_error(
                    body.set_string("greeting", format!("hello {user}{missing}")),
                )
            },
        )))
        .service(echo());

    let response = service
        .oneshot(post("/", r#"{"user": {"name": "ada"}}"#))
        .await
        .unwrap();

    assert_eq!(json_body(&response)["greeting"], "hello ada");
}

// =============================================================================
// Chain Tests
// =============================================================================

#[tokio::test]
async fn test_chain_abort_short_circuits() {
    init_tracing();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let chain = TransformerChain::<Document>::new()
        .with(transformer_fn(
            |_ctx: &TransformContext, body: &mut Document| {
                if body.get_string("role") == "admin" {
                    Flow::Continue
                } else {
                    Flow::Abort(StatusCode::FORBIDDEN)
                }
            },
        ))
        .with(transformer_fn(
            move |_ctx: &TransformContext, _body: &mut Document| {
                counter.fetch_add(1, Ordering::SeqCst);
                Flow::Continue
            },
        ));

    let mut service = ServiceBuilder::new()
        .layer(transform_body(chain))
        .service(echo());

    let response = service
        .ready()
        .await
        .unwrap()
        .call(post("/", r#"{"role": "guest"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.body().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let response = service
        .ready()
        .await
        .unwrap()
        .call(post("/", r#"{"role": "admin"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Query Tests
// =============================================================================

#[tokio::test]
async fn test_query_rewritten_before_inner_service() {
    init_tracing();

    let service = ServiceBuilder::new()
        .layer(transform_query(transformer_fn(
            |ctx: &TransformContext, query: &mut Query| {
                query.set_string("user", ctx.request.method.to_lowercase());
                query.remove("debug");
                Flow::Continue
            },
        )))
        .service(service_fn(reflect_uri));

    let request = Request::get("/search?q=rust+lang&debug=1")
        .body(Bytes::new())
        .unwrap();
    let response = service.oneshot(request).await.unwrap();

    assert_eq!(response.body(), "/search?q=rust%20lang&user=get");
}

// =============================================================================
// Response Body Tests
// =============================================================================

#[tokio::test]
async fn test_response_transformed_after_echo() {
    init_tracing();

    let service = ServiceBuilder::new()
        .layer(transform_response_body(transformer_fn(
            |ctx: &TransformContext, body: &mut Document| {
                let status = ctx.response.as_ref().map(|r| r.status).unwrap_or_default();
                Flow::abort_on_error(body.set_value("status", json!(status)))
            },
        )))
        .layer(transform_body(transformer_fn(
            |_ctx: &TransformContext, body: &mut Document| {
                Flow::abort_on_error(body.set_string("stage", "request"))
            },
        )))
        .service(echo());

    let response = service.oneshot(post("/", "{}")).await.unwrap();

    let body = json_body(&response);
    assert_eq!(body, json!({"stage": "request", "status": 200}));
    assert_eq!(
        response.headers()[CONTENT_LENGTH],
        response.body().len().to_string()
    );
}

// =============================================================================
// Configuration Pipeline Tests
// =============================================================================

#[tokio::test]
async fn test_configured_pipelines_end_to_end() {
    init_tracing();

    let yaml = r#"
version: "1"
query:
  - name: "pin-limit"
    operations:
      - set: { key: "limit", value: "50" }
request_body:
  - name: "tag-orders"
    when:
      path: { pattern: "^/orders/(?P<id>\\d+)$", type: regex }
      methods: ["POST"]
    operations:
      - set: { path: "meta.order_id", value: "${id}" }
      - append: { path: "meta.tags", value: { key: "via", value: "${request.method}" } }
      - delete: ["internal"]
  - name: "never"
    enabled: false
    operations:
      - delete: ["name"]
response_body:
  - name: "stamp"
    operations:
      - copy: { from: "meta.order_id", to: "order" }
"#;
    let pipelines = TransformConfig::from_yaml(yaml).unwrap().build().unwrap();

    let service = ServiceBuilder::new()
        .layer(pipelines.response_body_layer())
        .layer(pipelines.query_layer())
        .layer(pipelines.request_body_layer())
        .service(echo());

    let response = service
        .oneshot(post(
            "/orders/42?limit=5",
            r#"{"name": "widget", "internal": true}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(&response),
        json!({
            "name": "widget",
            "meta": {"order_id": "42", "tags": [{"key": "via", "value": "POST"}]},
            "order": "42"
        })
    );
}

#[tokio::test]
async fn test_configured_error_policy_aborts() {
    init_tracing();

    let yaml = r#"
request_body:
  - name: "append-to-scalar"
    operations:
      - append: { path: "name", value: 1 }
"#;
    let pipelines = TransformConfig::from_yaml(yaml).unwrap().build().unwrap();

    let service = ServiceBuilder::new()
        .layer(pipelines.request_body_layer())
        .service(echo());

    let response = service
        .oneshot(post("/", r#"{"name": "scalar"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_configured_body_limit() {
    init_tracing();

    let yaml = r#"
settings:
  max_body_size: 8
"#;
    let pipelines = TransformConfig::from_yaml(yaml).unwrap().build().unwrap();

    let service = ServiceBuilder::new()
        .layer(pipelines.request_body_layer())
        .service(echo());

    let response = service
        .oneshot(post("/", r#"{"name": "too long"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
