//! Tower middleware applying transformers to queries, request bodies and
//! response bodies.
//!
//! Each layer materializes a document from the wire representation, runs its
//! transformer, and writes the document back before the request continues
//! (or before the response is returned). A transformer that aborts answers
//! the request with its status and an empty body.
//!
//! ```rust,no_run
//! use tower::ServiceBuilder;
//! use zentinel_mitm::middleware::{echo, transform_body};
//! use zentinel_mitm::transformer::{transformer_fn, Flow};
//! use zentinel_mitm::{Document, TransformContext};
//!
//! let service = ServiceBuilder::new()
//!     .layer(transform_body(transformer_fn(
//!         |_ctx: &TransformContext, body: &mut Document| {
//!             Flow::abort_on_error(body.set_string("foo.bar", "baz"))
//!         },
//!     )))
//!     .service(echo());
//! ```

mod body;
mod echo;
mod query;
mod response;

pub use body::{transform_body, TransformBody, TransformBodyLayer};
pub use echo::{echo, Echo};
pub use query::{transform_query, TransformQuery, TransformQueryLayer};
pub use response::{transform_response_body, TransformResponseBody, TransformResponseBodyLayer};

use crate::document::DocumentError;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

/// Future returned by the transform services.
pub type ResponseFuture<E> = BoxFuture<'static, Result<Response<Bytes>, E>>;

/// Failures handled by the middleware itself, each mapped to a status.
#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("malformed JSON body: {0}")]
    Decode(#[source] DocumentError),

    #[error("body of {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },

    #[error("failed to encode transformed body: {0}")]
    Encode(#[source] DocumentError),

    #[error("failed to rebuild request URI: {0}")]
    Uri(#[from] http::Error),
}

impl From<DocumentError> for MiddlewareError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::Encode(_) => Self::Encode(err),
            DocumentError::Decode(_) | DocumentError::NotAnObject(_) => Self::Decode(err),
        }
    }
}

impl MiddlewareError {
    /// HTTP status this error is answered with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Encode(_) | Self::Uri(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Log the error and build the response for it.
    pub fn into_response(self) -> Response<Bytes> {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, status = status.as_u16(), "Transform middleware failed");
        } else {
            debug!(error = %self, status = status.as_u16(), "Rejecting request");
        }
        status_response(status)
    }
}

/// Empty response with the given status.
pub(crate) fn status_response(status: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    set_content_length(response.headers_mut(), 0);
    response
}

/// 200 response carrying a JSON body.
pub(crate) fn json_response(body: Bytes) -> Response<Bytes> {
    let len = body.len();
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    set_content_length(response.headers_mut(), len);
    response
}

/// Replace the declared body length.
///
/// The rewritten body is sent whole, so any transfer coding is dropped.
pub(crate) fn set_content_length(headers: &mut HeaderMap, len: usize) {
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
}
