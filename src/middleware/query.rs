//! Query string transform layer.

use super::{status_response, MiddlewareError, ResponseFuture};
use crate::context::{RequestInfo, TransformContext};
use crate::document::Query;
use crate::transformer::{Flow, Transformer};
use bytes::Bytes;
use http::uri::PathAndQuery;
use http::{Request, Response, Uri};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, trace};

/// Apply `transformer` to the request query before the inner service.
pub fn transform_query<T>(transformer: T) -> TransformQueryLayer<T>
where
    T: Transformer<Query> + 'static,
{
    TransformQueryLayer {
        transformer: Arc::new(transformer),
    }
}

/// Layer produced by [`transform_query`].
pub struct TransformQueryLayer<T> {
    transformer: Arc<T>,
}

impl<T> Clone for TransformQueryLayer<T> {
    fn clone(&self) -> Self {
        Self {
            transformer: self.transformer.clone(),
        }
    }
}

impl<S, T> Layer<S> for TransformQueryLayer<T> {
    type Service = TransformQuery<S, T>;

    fn layer(&self, inner: S) -> Self::Service {
        TransformQuery {
            inner,
            transformer: self.transformer.clone(),
        }
    }
}

/// Service produced by [`TransformQueryLayer`].
pub struct TransformQuery<S, T> {
    inner: S,
    transformer: Arc<T>,
}

impl<S: Clone, T> Clone for TransformQuery<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            transformer: self.transformer.clone(),
        }
    }
}

impl<S, T> Service<Request<Bytes>> for TransformQuery<S, T>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    T: Transformer<Query> + 'static,
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

        Box::pin(async move {
            let (mut parts, body) = request.into_parts();

            let ctx = TransformContext::new(RequestInfo::from_parts(&parts));
            let mut query = ctx.request.query.clone();
            if let Flow::Abort(status) = transformer.transform(&ctx, &mut query).await {
                return Ok(status_response(status));
            }

            let encoded = query.encode();
            if parts.uri.path_and_query().is_none() {
                // Authority-form targets (CONNECT) have no query to rewrite
                if !encoded.is_empty() {
                    debug!(
                        uri = %parts.uri,
                        query = %encoded,
                        "Query dropped for authority-form target"
                    );
                }
            } else {
                parts.uri = match with_query(&parts.uri, &encoded) {
                    Ok(uri) => uri,
                    Err(err) => return Ok(err.into_response()),
                };
                trace!(path = %ctx.request.path, query = %encoded, "Request query rewritten");
            }

            inner.call(Request::from_parts(parts, body)).await
        })
    }
}

/// Replace the query of `uri`, dropping the `?` when `query` is empty.
fn with_query(uri: &Uri, query: &str) -> Result<Uri, MiddlewareError> {
    let path_and_query = if query.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), query)
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query =
        Some(PathAndQuery::try_from(path_and_query).map_err(http::Error::from)?);
    Ok(Uri::from_parts(parts).map_err(http::Error::from)?)
}
