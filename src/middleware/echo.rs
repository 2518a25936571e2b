//! Echo fixture service.

use super::{json_response, MiddlewareError};
use crate::document::Document;
use bytes::Bytes;
use http::{Request, Response};
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::task::{Context, Poll};
use tower::Service;

/// Service answering every request with its own JSON body, re-encoded.
///
/// Used as the terminal service when exercising the transform layers: what
/// comes back is exactly what the layers forwarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

/// Create an [`Echo`] service.
pub fn echo() -> Echo {
    Echo
}

impl Service<Request<Bytes>> for Echo {
    type Response = Response<Bytes>;
    type Error = Infallible;
    type Future = Ready<Result<Response<Bytes>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        let response = Document::from_slice(request.body())
            .and_then(|document| document.to_bytes())
            .map(json_response)
            .unwrap_or_else(|err| MiddlewareError::from(err).into_response());
        ready(Ok(response))
    }
}
