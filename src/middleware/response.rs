//! Response body transform layer.

use super::{set_content_length, status_response, MiddlewareError, ResponseFuture};
use crate::config::DEFAULT_MAX_BODY_SIZE;
use crate::context::{RequestInfo, ResponseInfo, TransformContext};
use crate::document::Document;
use crate::transformer::{Flow, Transformer};
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderMap, Request, Response};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, trace, warn};

/// Apply `transformer` to the JSON response body produced by the inner
/// service, before the response is handed back to the caller.
///
/// Bodies that are empty, not a JSON object, declared as another media type,
/// content-encoded, or larger than the configured limit are passed through
/// untouched.
pub fn transform_response_body<T>(transformer: T) -> TransformResponseBodyLayer<T>
where
    T: Transformer<Document> + 'static,
{
    TransformResponseBodyLayer {
        transformer: Arc::new(transformer),
        max_body_size: DEFAULT_MAX_BODY_SIZE,
    }
}

/// Layer produced by [`transform_response_body`].
pub struct TransformResponseBodyLayer<T> {
    transformer: Arc<T>,
    max_body_size: usize,
}

impl<T> TransformResponseBodyLayer<T> {
    /// Pass response bodies larger than `limit` bytes through untransformed.
    pub fn max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }
}

impl<T> Clone for TransformResponseBodyLayer<T> {
    fn clone(&self) -> Self {
        Self {
            transformer: self.transformer.clone(),
            max_body_size: self.max_body_size,
        }
    }
}

impl<S, T> Layer<S> for TransformResponseBodyLayer<T> {
    type Service = TransformResponseBody<S, T>;

    fn layer(&self, inner: S) -> Self::Service {
        TransformResponseBody {
            inner,
            transformer: self.transformer.clone(),
            max_body_size: self.max_body_size,
        }
    }
}

/// Service produced by [`TransformResponseBodyLayer`].
pub struct TransformResponseBody<S, T> {
    inner: S,
    transformer: Arc<T>,
    max_body_size: usize,
}

impl<S: Clone, T> Clone for TransformResponseBody<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            transformer: self.transformer.clone(),
            max_body_size: self.max_body_size,
        }
    }
}

impl<S, T> Service<Request<Bytes>> for TransformResponseBody<S, T>
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
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let transformer = self.transformer.clone();
        let max_body_size = self.max_body_size;

        // The request is consumed by the inner service
        let (parts, body) = request.into_parts();
        let request_info = RequestInfo::from_parts(&parts);
        let future = inner.call(Request::from_parts(parts, body));

        Box::pin(async move {
            let response = future.await?;
            let (mut parts, body) = response.into_parts();

            if body.len() > max_body_size {
                warn!(
                    path = %request_info.path,
                    size = body.len(),
                    limit = max_body_size,
                    "Response body exceeds limit, passing through"
                );
                return Ok(Response::from_parts(parts, body));
            }

            if !is_plain_json(&parts.headers) {
                debug!(
                    path = %request_info.path,
                    content_type = ?parts.headers.get(CONTENT_TYPE),
                    content_encoding = ?parts.headers.get(CONTENT_ENCODING),
                    "Response body is not plain JSON, passing through"
                );
                return Ok(Response::from_parts(parts, body));
            }

            let mut document = match Document::from_slice(&body) {
                Ok(document) => document,
                Err(err) => {
                    debug!(
                        path = %request_info.path,
                        error = %err,
                        "Response body is not a JSON object, passing through"
                    );
                    return Ok(Response::from_parts(parts, body));
                }
            };

            let ctx = TransformContext::new(request_info)
                .with_response(ResponseInfo::from_parts(&parts));
            if let Flow::Abort(status) = transformer.transform(&ctx, &mut document).await {
                return Ok(status_response(status));
            }

            let encoded = match document.to_bytes() {
                Ok(encoded) => encoded,
                Err(err) => return Ok(MiddlewareError::from(err).into_response()),
            };
            trace!(
                path = %ctx.request.path,
                status = parts.status.as_u16(),
                length = encoded.len(),
                "Response body rewritten"
            );

            set_content_length(&mut parts.headers, encoded.len());
            Ok(Response::from_parts(parts, encoded))
        })
    }
}

/// Whether the response headers allow the body to be read as JSON.
///
/// A missing `content-type` is accepted; an encoded body never is.
fn is_plain_json(headers: &HeaderMap) -> bool {
    let encoded = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().eq_ignore_ascii_case("identity"));
    if encoded {
        return false;
    }

    match headers.get(CONTENT_TYPE) {
        None => true,
        Some(value) => value.to_str().is_ok_and(|value| {
            let essence = value.split(';').next().unwrap_or_default().trim();
            essence.eq_ignore_ascii_case("application/json")
                || essence.to_ascii_lowercase().ends_with("+json")
        }),
    }
}
