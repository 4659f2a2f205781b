//! Per-message transform pipeline.
//!
//! Cross-cutting delivery concerns (tagging, filtering, enrichment) compose
//! as an ordered list of explicit transforms applied by the hub and the
//! replay coordinator. Replayed and live envelopes travel the identical
//! pipeline, so a handler cannot tell them apart.

use crate::error::PipelineError;
use girder_commons::{BroadcastingName, Envelope};
use std::sync::Arc;

/// What a transform sees and may rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryContext {
    pub broadcasting: BroadcastingName,
    pub envelope: Envelope,
}

impl DeliveryContext {
    pub fn new(broadcasting: BroadcastingName, envelope: Envelope) -> Self {
        Self { broadcasting, envelope }
    }
}

/// One `(context) -> context` transformer.
pub trait MessageTransform: Send + Sync {
    fn apply(&self, ctx: DeliveryContext) -> Result<DeliveryContext, PipelineError>;
}

/// Ordered transform composition. Empty by default; transforms run in the
/// order they were pushed.
#[derive(Clone, Default)]
pub struct MessagePipeline {
    transforms: Vec<Arc<dyn MessageTransform>>,
}

impl MessagePipeline {
    pub fn new() -> Self {
        Self { transforms: Vec::new() }
    }

    pub fn with_transform(mut self, transform: Arc<dyn MessageTransform>) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Run the context through every transform in order.
    pub fn apply(&self, ctx: DeliveryContext) -> Result<DeliveryContext, PipelineError> {
        let mut ctx = ctx;
        for transform in &self.transforms {
            ctx = transform.apply(ctx)?;
        }
        Ok(ctx)
    }
}

impl std::fmt::Debug for MessagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePipeline").field("transforms", &self.transforms.len()).finish()
    }
}
