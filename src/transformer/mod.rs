//! Transformers: units of document mutation, and ordered chains of them.
//!
//! A transformer receives the request context and the live document and
//! returns a [`Flow`]. Chains are transformers too, so they nest.

pub mod rule;

pub use rule::{BodyOperation, QueryOperation, RuleTransformer};

use crate::context::TransformContext;
use async_trait::async_trait;
use http::StatusCode;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Outcome of a transformer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the next transformer
    Continue,
    /// Stop the chain and answer with this status
    Abort(StatusCode),
}

impl Flow {
    pub fn is_abort(&self) -> bool {
        matches!(self, Flow::Abort(_))
    }

    /// `Continue` on success, `Abort(500)` on error.
    pub fn abort_on_error<E: fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Flow::Continue,
            Err(err) => {
                warn!(error = %err, "Transform failed, aborting");
                Flow::Abort(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

/// A unit of mutation over a document of type `D`.
#[async_trait]
pub trait Transformer<D>: Send + Sync {
    /// Mutate `doc` in place, or abort.
    ///
    /// Mutations made before returning `Abort` are kept.
    async fn transform(&self, ctx: &TransformContext, doc: &mut D) -> Flow;

    /// Name for logging.
    fn name(&self) -> &str {
        "transformer"
    }
}

#[async_trait]
impl<D, T> Transformer<D> for Arc<T>
where
    D: Send,
    T: Transformer<D> + ?Sized,
{
    async fn transform(&self, ctx: &TransformContext, doc: &mut D) -> Flow {
        (**self).transform(ctx, doc).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// A transformer backed by a plain function.
pub struct TransformerFn<F> {
    name: String,
    f: F,
}

/// Wrap a function as a [`Transformer`].
pub fn transformer_fn<D, F>(f: F) -> TransformerFn<F>
where
    F: Fn(&TransformContext, &mut D) -> Flow + Send + Sync,
{
    TransformerFn {
        name: "transformer_fn".to_string(),
        f,
    }
}

impl<F> TransformerFn<F> {
    /// Set the name reported in logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<D, F> Transformer<D> for TransformerFn<F>
where
    D: Send,
    F: Fn(&TransformContext, &mut D) -> Flow + Send + Sync,
{
    async fn transform(&self, ctx: &TransformContext, doc: &mut D) -> Flow {
        (self.f)(ctx, doc)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered transformers applied one after another.
///
/// Execution stops at the first transformer that aborts.
pub struct TransformerChain<D> {
    transformers: Vec<Arc<dyn Transformer<D>>>,
}

impl<D: Send + 'static> Default for TransformerChain<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Send + 'static> TransformerChain<D> {
    pub fn new() -> Self {
        Self {
            transformers: Vec::new(),
        }
    }

    /// Add a transformer to the end of the chain.
    pub fn push<T>(&mut self, transformer: T)
    where
        T: Transformer<D> + 'static,
    {
        self.transformers.push(Arc::new(transformer));
    }

    /// Builder form of [`push`](Self::push).
    pub fn with<T>(mut self, transformer: T) -> Self
    where
        T: Transformer<D> + 'static,
    {
        self.push(transformer);
        self
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }
}

impl<D> Clone for TransformerChain<D> {
    fn clone(&self) -> Self {
        Self {
            transformers: self.transformers.clone(),
        }
    }
}

#[async_trait]
impl<D: Send + 'static> Transformer<D> for TransformerChain<D> {
    async fn transform(&self, ctx: &TransformContext, doc: &mut D) -> Flow {
        for (index, transformer) in self.transformers.iter().enumerate() {
            trace!(index, transformer = transformer.name(), "Applying transformer");

            let flow = transformer.transform(ctx, doc).await;
            if let Flow::Abort(status) = flow {
                debug!(
                    index,
                    transformer = transformer.name(),
                    status = status.as_u16(),
                    "Transformer chain aborted"
                );
                return flow;
            }
        }
        Flow::Continue
    }

    fn name(&self) -> &str {
        "transformer_chain"
    }
}
