//! Controller traits.

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::Result;
use crate::types::PipelineOutcome;

/// Runs a raw request through the whole pipeline.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Recognize, fuse and execute every intent in `text`.
    async fn run(&self, text: &str, ctx: &RequestContext) -> Result<PipelineOutcome>;
}
