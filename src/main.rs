//! IntentFlow - adaptive task orchestration
//!
//! Recognizes multi-intent requests, fuses related intents, routes each one by
//! complexity, and runs complex work as hierarchical plans under
//! self-correction.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use intentflow_controller::{CheckpointValidator, HierarchicalPlanner, PipelineOrchestrator, SelfCorrectionLoop};
use intentflow_core::config::AppConfig;
use intentflow_gateway::{AppState, GatewayServer, IntentFusion, MultiIntentRecognizer};
use intentflow_model_gateway::{
    tiers_from_config, ComplexityAnalyzer, DistillationRouter, LlmModelExecutor, LlmStepExecutor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate()?;

    intentflow_telemetry::configure_tracing(&config.telemetry)?;
    tracing::info!("Starting IntentFlow v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = if config.telemetry.enable_metrics {
        Some(intentflow_telemetry::setup_metrics_recorder()?)
    } else {
        None
    };

    // =========================================================================
    // History Store
    // =========================================================================
    let store = intentflow_store::open_store(&config.store)?;
    tracing::info!(backend = %config.store.backend, "History store ready");

    // =========================================================================
    // Model Gateway
    // =========================================================================
    let llm_timeout = Duration::from_millis(config.llm.timeout_ms);
    let tiers = tiers_from_config(&config.llm)?;
    tracing::info!(
        small = %config.llm.small.model,
        large = %config.llm.large.model,
        "Model tiers configured"
    );

    let executor = Arc::new(LlmModelExecutor::new(tiers.clone()).with_timeout(llm_timeout));
    let router = Arc::new(DistillationRouter::new(config.distillation.clone(), executor, store.clone()));

    // =========================================================================
    // Gateway: recognition and fusion
    // =========================================================================
    let recognizer = Arc::new(MultiIntentRecognizer::new(tiers.small.clone()).with_llm_timeout(llm_timeout));
    let fusion = Arc::new(
        IntentFusion::new(config.fusion.clone(), store.clone())
            .with_llm(tiers.small.clone())
            .with_llm_timeout(llm_timeout),
    );

    // =========================================================================
    // Controller: planning, checkpoints, self-correction
    // =========================================================================
    let planner = Arc::new(
        HierarchicalPlanner::new(tiers.large.clone(), store.clone())
            .with_config(config.planner.clone())
            .with_complexity(
                ComplexityAnalyzer::from_config(&config.distillation),
                router.weights().weights,
            )
            .with_llm_timeout(llm_timeout),
    );
    let validator = Arc::new(
        CheckpointValidator::new(store.clone())
            .with_llm(tiers.small.clone())
            .with_config(config.checkpoint.clone())
            .with_llm_timeout(llm_timeout),
    );
    let correction = Arc::new(
        SelfCorrectionLoop::new(store.clone())
            .with_llm(tiers.large.clone())
            .with_validator(validator)
            .with_config(config.correction.clone())
            .with_llm_timeout(llm_timeout),
    );
    let step_executor = Arc::new(
        LlmStepExecutor::new(tiers.large.clone())
            .with_timeout(Duration::from_millis(config.correction.step_timeout_ms)),
    );

    let orchestrator = Arc::new(
        PipelineOrchestrator::new(
            recognizer.clone(),
            fusion.clone(),
            router.clone(),
            planner,
            correction,
            step_executor,
            store.clone(),
        )
        .with_config(config.pipeline.clone()),
    );

    // =========================================================================
    // HTTP surface
    // =========================================================================
    let state = AppState {
        orchestrator,
        recognizer,
        fusion,
        router,
        store,
        request_timeout: Duration::from_millis(config.server.request_timeout_ms),
    };
    let mut server = GatewayServer::new(config.server.clone(), state);
    if let Some(handle) = metrics_handle {
        server = server.with_metrics(handle);
    }

    server.run().await?;
    Ok(())
}
