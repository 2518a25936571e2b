//! Request body transform layer.

use super::{set_content_length, status_response, MiddlewareError, ResponseFuture};
use crate::config::DEFAULT_MAX_BODY_SIZE;
use crate::context::{RequestInfo, TransformContext};
use crate::document::Document;
use crate::transformer::{Flow, Transformer};
use bytes::Bytes;
use http::{Request, Response};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::trace;

/// Apply `transformer` to the JSON request body before the inner service.
pub fn transform_body<T>(transformer: T) -> TransformBodyLayer<T>
where
    T: Transformer<Document> + 'static,
{
    TransformBodyLayer {
        transformer: Arc::new(transformer),
        max_body_size: DEFAULT_MAX_BODY_SIZE,
    }
}

/// Layer produced by [`transform_body`].
pub struct TransformBodyLayer<T> {
    transformer: Arc<T>,
    max_body_size: usize,
}

impl<T> TransformBodyLayer<T> {
    /// Reject request bodies larger than `limit` bytes with 413.
    pub fn max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }
}

impl<T> Clone for TransformBodyLayer<T> {
    fn clone(&self) -> Self {
        Self {
            transformer: self.transformer.clone(),
            max_body_size: self.max_body_size,
        }
    }
}

impl<S, T> Layer<S> for TransformBodyLayer<T> {
    type Service = TransformBody<S, T>;

    fn layer(&self, inner: S) -> Self::Service {
        TransformBody {
            inner,
            transformer: self.transformer.clone(),
            max_body_size: self.max_body_size,
        }
    }
}

/// Service produced by [`TransformBodyLayer`].
pub struct TransformBody<S, T> {
    inner: S,
    transformer: Arc<T>,
    max_body_size: usize,
}

impl<S: Clone, T> Clone for TransformBody<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            transformer: self.transformer.clone(),
            max_body_size: self.max_body_size,
        }
    }
}

impl<S, T> Service<Request<Bytes>> for TransformBody<S, T>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    T: Transformer<Document> + 'static,
{
    type Response = Response<Bytes>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        // Take the service that was polled ready and leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let transformer = self.transformer.clone();
        let max_body_size = self.max_body_size;

        Box::pin(async move {
            let (mut parts, body) = request.into_parts();

            if body.len() > max_body_size {
                return Ok(MiddlewareError::BodyTooLarge {
                    size: body.len(),
                    limit: max_body_size,
                }
                .into_response());
            }

            let mut document = match Document::from_slice(&body) {
                Ok(document) => document,
                Err(err) => return Ok(MiddlewareError::from(err).into_response()),
            };
            drop(body);

            let ctx = TransformContext::new(RequestInfo::from_parts(&parts));
            if let Flow::Abort(status) = transformer.transform(&ctx, &mut document).await {
                return Ok(status_response(status));
            }

            let encoded = match document.to_bytes() {
                Ok(encoded) => encoded,
                Err(err) => return Ok(MiddlewareError::from(err).into_response()),
            };
            trace!(
                path = %ctx.request.path,
                length = encoded.len(),
                "Request body rewritten"
            );

            set_content_length(&mut parts.headers, encoded.len());
            inner.call(Request::from_parts(parts, encoded)).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::transformer_fn;
    use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
    use http::StatusCode;
    use serde_json::json;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::{service_fn, ServiceExt};

    /// Inner service answering with the body and content-length it received.
    async fn capture(request: Request<Bytes>) -> Result<Response<Bytes>, Infallible> {
        let declared = request.headers()[CONTENT_LENGTH].clone();
        let mut response = Response::new(request.into_body());
        response.headers_mut().insert(CONTENT_LENGTH, declared);
        Ok(response)
    }

    /// Inner service answering with the framing headers it received.
    async fn capture_framing(request: Request<Bytes>) -> Result<Response<Bytes>, Infallible> {
        let header = |name: http::HeaderName| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string()
        };
        let framing = format!("te={} cl={}", header(TRANSFER_ENCODING), header(CONTENT_LENGTH));
        Ok(Response::new(Bytes::from(framing)))
    }

    fn post(body: &'static str) -> Request<Bytes> {
        Request::post("/items")
            .header(CONTENT_LENGTH, body.len())
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_body_rewritten_with_new_length() {
        let layer = transform_body(transformer_fn(
            |_ctx: &TransformContext, body: &mut Document| {
                Flow::abort_on_error(body.set_string("name", "a much longer value"))
            },
        ));

        let response = layer
            .layer(service_fn(capture))
            .oneshot(post(r#"{"name":"x"}"#))
            .await
            .unwrap();

        let body = response.body().clone();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&body).unwrap(),
            json!({"name": "a much longer value"})
        );
        assert_eq!(
            response.headers()[CONTENT_LENGTH],
            body.len().to_string()
        );
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected_before_transform() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let layer = transform_body(transformer_fn(
            move |_ctx: &TransformContext, _body: &mut Document| {
                flag.store(true, Ordering::SeqCst);
                Flow::Continue
            },
        ));

        let response = layer
            .layer(service_fn(capture))
            .oneshot(post("{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_abort_skips_inner_service() {
        let layer = transform_body(transformer_fn(
            |_ctx: &TransformContext, body: &mut Document| {
                if body.contains("forbidden") {
                    Flow::Abort(StatusCode::FORBIDDEN)
                } else {
                    Flow::Continue
                }
            },
        ));

        let response = layer
            .layer(service_fn(capture))
            .oneshot(post(r#"{"forbidden":true}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn test_chunked_request_forwarded_with_length() {
        let layer = transform_body(transformer_fn(
            |_ctx: &TransformContext, body: &mut Document| {
                Flow::abort_on_error(body.set_string("a", "b"))
            },
        ));

        let request = Request::post("/")
            .header(TRANSFER_ENCODING, "chunked")
            .body(Bytes::from_static(b"{}"))
            .unwrap();
        let response = layer
            .layer(service_fn(capture_framing))
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.body(), "te=none cl=9");
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let layer = transform_body(transformer_fn(
            |_ctx: &TransformContext, _body: &mut Document| Flow::Continue,
        ))
        .max_body_size(4);

        let response = layer
            .layer(service_fn(capture))
            .oneshot(post(r#"{"a":1}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
