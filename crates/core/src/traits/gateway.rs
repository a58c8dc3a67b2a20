//! Gateway traits.

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::Result;
use crate::types::Intent;

/// Baseline single-intent classifier.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify `text` as exactly one intent.
    async fn classify(&self, text: &str, ctx: &RequestContext) -> Result<Intent>;
}
