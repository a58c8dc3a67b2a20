//! End-to-end pipeline: recognize, fuse, then route each fused intent.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use intentflow_core::{
    config::PipelineConfig,
    persist_best_effort,
    traits::{HistoryStore, Orchestrator, StepExecutor},
    types::{
        ComplexityLevel, Intent, IntentOutcome, IntentRoute, MultiIntentResult, OutcomeStatus, PipelineOutcome, Task,
    },
    Error, RequestContext, Result,
};
use intentflow_gateway::{IntentFusion, MultiIntentRecognizer};
use intentflow_model_gateway::DistillationRouter;

use crate::correction::SelfCorrectionLoop;
use crate::planning::{granularity_for, HierarchicalPlanner};

/// Default [`Orchestrator`].
///
/// Complex intents are planned and run under self-correction; everything
/// else goes straight to the complexity router.
pub struct PipelineOrchestrator {
    recognizer: Arc<MultiIntentRecognizer>,
    fusion: Arc<IntentFusion>,
    router: Arc<DistillationRouter>,
    planner: Arc<HierarchicalPlanner>,
    correction: Arc<SelfCorrectionLoop>,
    executor: Arc<dyn StepExecutor>,
    store: Arc<dyn HistoryStore>,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        recognizer: Arc<MultiIntentRecognizer>,
        fusion: Arc<IntentFusion>,
        router: Arc<DistillationRouter>,
        planner: Arc<HierarchicalPlanner>,
        correction: Arc<SelfCorrectionLoop>,
        executor: Arc<dyn StepExecutor>,
        store: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            recognizer,
            fusion,
            router,
            planner,
            correction,
            executor,
            store,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one fused intent on the route its complexity calls for.
    async fn handle_intent(&self, intent: &Intent, ctx: &RequestContext) -> IntentOutcome {
        let mut task = Task::from_intent(intent.clone());
        if let Some(input) = &ctx.user_input {
            task = task.with_context(input.clone());
        }
        let level = self.router.assess(&task).level;

        let (route, result) = if level == ComplexityLevel::Complex {
            (IntentRoute::PlannedWithCorrection, self.plan_and_correct(intent, level, ctx).await)
        } else {
            (IntentRoute::Distilled, self.distill(&task, ctx).await)
        };

        let (status, output, error) = match result {
            Ok((true, output, _)) => (OutcomeStatus::Succeeded, Some(output), None),
            Ok((false, output, error)) => (OutcomeStatus::Failed, Some(output), error),
            Err(e) if e.is_interruption() && ctx.is_cancelled() => (OutcomeStatus::Cancelled, None, Some(e.to_string())),
            Err(e) => (OutcomeStatus::Failed, None, Some(e.to_string())),
        };

        tracing::info!(
            session_id = %ctx.session_id,
            priority = intent.priority,
            kind = %intent.kind,
            level = %level,
            route = ?route,
            status = ?status,
            "Intent handled"
        );

        IntentOutcome {
            priority: intent.priority,
            kind: intent.kind.clone(),
            route,
            complexity: Some(level),
            status,
            output,
            error,
        }
    }

    async fn distill(&self, task: &Task, ctx: &RequestContext) -> Result<(bool, Value, Option<String>)> {
        let distilled = self.router.execute_with_distillation(task, ctx).await?;
        Ok((true, serde_json::to_value(&distilled)?, None))
    }

    async fn plan_and_correct(
        &self,
        intent: &Intent,
        level: ComplexityLevel,
        ctx: &RequestContext,
    ) -> Result<(bool, Value, Option<String>)> {
        let plan = self.planner.plan(intent, ctx, granularity_for(level)).await?;
        if ctx.is_cancelled() {
            return Err(Error::Cancelled("pipeline stopped after planning".into()));
        }
        let options = self.correction.default_options();
        let attempt = self
            .correction
            .execute_with_correction(&plan.to_task_plan(), self.executor.as_ref(), &options, ctx)
            .await?;
        if attempt.cancelled {
            return Err(Error::Cancelled("correction loop cancelled".into()));
        }
        let success = attempt.final_success;
        let error = attempt.last_error.clone();
        Ok((success, serde_json::to_value(&attempt)?, error))
    }

    /// Outcome for an intent given the outcomes of intents it depends on.
    async fn gated(&self, intent: &Intent, done: &HashMap<u32, bool>, ctx: &RequestContext) -> IntentOutcome {
        if ctx.is_cancelled() {
            return IntentOutcome::cancelled(intent);
        }
        let unmet: Vec<u32> = intent
            .dependencies
            .iter()
            .copied()
            .filter(|d| !done.get(d).copied().unwrap_or(false))
            .collect();
        if !unmet.is_empty() {
            return IntentOutcome::skipped(intent, format!("prerequisites did not succeed: {:?}", unmet));
        }
        self.handle_intent(intent, ctx).await
    }

    async fn execute_all(&self, intents: &[Intent], ctx: &RequestContext) -> Vec<IntentOutcome> {
        let mut slots: Vec<Option<IntentOutcome>> = vec![None; intents.len()];
        let mut done: HashMap<u32, bool> = HashMap::new();

        if self.config.parallel_independent {
            let independent: Vec<usize> = (0..intents.len())
                .filter(|i| intents[*i].dependencies.is_empty())
                .collect();
            let results = join_all(independent.iter().map(|i| self.gated(&intents[*i], &done, ctx))).await;
            for (i, outcome) in independent.into_iter().zip(results) {
                done.insert(intents[i].priority, outcome.succeeded());
                slots[i] = Some(outcome);
            }
        }

        for (i, intent) in intents.iter().enumerate() {
            if slots[i].is_some() {
                continue;
            }
            let outcome = self.gated(intent, &done, ctx).await;
            done.insert(intent.priority, outcome.succeeded());
            slots[i] = Some(outcome);
        }

        slots.into_iter().flatten().collect()
    }

    async fn finish(&self, outcome: PipelineOutcome, started: Instant, ctx: &RequestContext) -> PipelineOutcome {
        intentflow_telemetry::track_pipeline(
            outcome.success,
            outcome.fused_intents.len(),
            started.elapsed().as_secs_f64(),
        );
        persist_best_effort(self.store.as_ref(), ctx, &outcome).await;
        outcome
    }
}

#[async_trait]
impl Orchestrator for PipelineOrchestrator {
    async fn run(&self, text: &str, ctx: &RequestContext) -> Result<PipelineOutcome> {
        let started = Instant::now();
        let ctx = match ctx.user_input {
            Some(_) => ctx.clone(),
            None => ctx.clone().with_user_input(text),
        };

        let recognition = self.recognizer.classify_multiple(text, &ctx).await?;
        if ctx.is_cancelled() {
            return Ok(self.finish(cancelled_outcome(&ctx, recognition, Vec::new()), started, &ctx).await);
        }

        let fused = self.fusion.fuse_intents(&recognition.intents, &ctx).await?;
        if ctx.is_cancelled() {
            return Ok(self.finish(cancelled_outcome(&ctx, recognition, fused), started, &ctx).await);
        }

        let outcomes = self.execute_all(&fused, &ctx).await;
        let cancelled = ctx.is_cancelled() || outcomes.iter().any(|o| o.status == OutcomeStatus::Cancelled);
        let success = !cancelled && outcomes.iter().all(IntentOutcome::succeeded);

        tracing::info!(
            session_id = %ctx.session_id,
            recognized = recognition.intents.len(),
            fused = fused.len(),
            success,
            cancelled,
            "Pipeline finished"
        );

        let outcome = PipelineOutcome {
            session_id: ctx.session_id.clone(),
            recognition,
            fused_intents: fused,
            outcomes,
            success,
            cancelled,
        };
        Ok(self.finish(outcome, started, &ctx).await)
    }
}

fn cancelled_outcome(ctx: &RequestContext, recognition: MultiIntentResult, fused: Vec<Intent>) -> PipelineOutcome {
    tracing::info!(session_id = %ctx.session_id, "Pipeline cancelled between stages");
    let outcomes = fused.iter().map(IntentOutcome::cancelled).collect();
    PipelineOutcome {
        session_id: ctx.session_id.clone(),
        recognition,
        fused_intents: fused,
        outcomes,
        success: false,
        cancelled: true,
    }
}
