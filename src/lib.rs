//! Request and response interception for a JSON proxy.
//!
//! Traffic passing through the proxy is materialized as mutable documents:
//!
//! - the request query string as a [`Query`]
//! - JSON request and response bodies as a [`Document`], addressed by
//!   dot-separated paths such as `foo.bar` or `items[0].id`
//!
//! Documents are mutated by [`Transformer`]s composed into a
//! [`TransformerChain`]. A transformer returning [`Flow::Abort`] stops the
//! chain and the proxy answers with the given status instead of forwarding.
//! The chains plug into a tower stack through the layers in [`middleware`].
//!
//! ## Configuration Example
//!
//! Chains can also be built from declarative rules:
//!
//! ```yaml
//! version: "1"
//! settings:
//!   max_body_size: 1048576
//! query:
//!   - name: "force-page-size"
//!     operations:
//!       - set: { key: "limit", value: "50" }
//! request_body:
//!   - name: "tag-orders"
//!     when:
//!       path: { pattern: "^/orders/(?P<id>\\d+)$", type: regex }
//!       methods: ["POST"]
//!     operations:
//!       - set: { path: "meta.order_id", value: "${id}" }
//!       - append: { path: "meta.tags", value: { key: "via", value: "proxy" } }
//! ```

pub mod config;
pub mod context;
pub mod document;
pub mod matcher;
pub mod middleware;
pub mod transformer;

pub use config::{ConfigError, Pipelines, TransformConfig};
pub use context::TransformContext;
pub use document::{Document, DocumentError, Path, PathError, Query};
pub use middleware::{echo, transform_body, transform_query, transform_response_body};
pub use transformer::{transformer_fn, Flow, Transformer, TransformerChain};
