//! Step execution traits.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::Result;
use crate::types::PlanStep;

/// Executes one plan step against the outside world.
///
/// Only the correction loop calls this; tool semantics live behind it.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &PlanStep, ctx: &RequestContext) -> Result<Value>;
}

type StepFn = dyn Fn(PlanStep) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// Adapter turning a closure into a [`StepExecutor`].
pub struct FnExecutor {
    f: Box<StepFn>,
}

impl FnExecutor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(PlanStep) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl StepExecutor for FnExecutor {
    async fn execute(&self, step: &PlanStep, _ctx: &RequestContext) -> Result<Value> {
        (self.f)(step.clone()).await
    }
}
