use intentflow_controller::{CheckpointValidator, HierarchicalPlanner, PipelineOrchestrator, SelfCorrectionLoop};
use intentflow_core::{
    config::{CorrectionConfig, DistillationConfig, FusionConfig, PipelineConfig},
    fetch_records,
    mocks::{MockLlm, MockModelExecutor, ScriptedExecutor, StepScript},
    traits::Orchestrator,
    types::{
        CheckpointValidation, CorrectionAttempt, DistillationRecord, HierarchicalPlan, HistoryFilter, IntentRoute,
        OutcomeStatus, PipelineOutcome,
    },
    IntentKind, RequestContext,
};
use intentflow_gateway::{IntentFusion, MultiIntentRecognizer};
use intentflow_model_gateway::DistillationRouter;
use intentflow_store::InMemoryHistoryStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const REFACTOR_STEP: &str = "rewrite auth module";

fn recognition_reply(second_depends_on_first: bool) -> String {
    let deps = if second_depends_on_first { json!([1]) } else { json!([]) };
    json!({
        "isMultiIntent": true,
        "intents": [
            {"type": "REFACTOR_CODE", "params": {"path": "src/auth"}, "priority": 1, "dependencies": []},
            {"type": "CREATE_FILE", "params": {"filePath": "NOTES.md"}, "priority": 2, "dependencies": deps}
        ]
    })
    .to_string()
}

fn plan_reply() -> String {
    json!([{"title": REFACTOR_STEP, "tool": "REFACTOR_CODE", "params": {"path": "src/auth"}}]).to_string()
}

struct Harness {
    orchestrator: PipelineOrchestrator,
    store: Arc<InMemoryHistoryStore>,
    executor: Arc<ScriptedExecutor>,
}

fn harness(reply: String, executor: ScriptedExecutor, pipeline: PipelineConfig) -> Harness {
    let store = Arc::new(InMemoryHistoryStore::new());
    let executor = Arc::new(executor);

    let recognizer = MultiIntentRecognizer::new(Arc::new(MockLlm::constant(&reply)));
    let fusion = IntentFusion::new(
        FusionConfig {
            enable_llm_fusion: false,
            ..FusionConfig::default()
        },
        store.clone(),
    );
    let router = DistillationRouter::new(
        DistillationConfig {
            simple_threshold: 0.2,
            complex_threshold: 0.45,
            ..DistillationConfig::default()
        },
        Arc::new(MockModelExecutor::new(
            json!({"filePath": "NOTES.md", "confidence": 0.9}),
            json!({"filePath": "NOTES.md"}),
        )),
        store.clone(),
    );
    let planner = HierarchicalPlanner::new(Arc::new(MockLlm::constant(&plan_reply())), store.clone());
    let correction = SelfCorrectionLoop::new(store.clone())
        .with_validator(Arc::new(CheckpointValidator::new(store.clone())))
        .with_config(CorrectionConfig {
            max_retries: 1,
            ..CorrectionConfig::default()
        });

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(recognizer),
        Arc::new(fusion),
        Arc::new(router),
        Arc::new(planner),
        Arc::new(correction),
        executor.clone(),
        store.clone(),
    )
    .with_config(pipeline);

    Harness {
        orchestrator,
        store,
        executor,
    }
}

fn refactor_ok() -> StepScript {
    StepScript::Ok(json!({"changedFiles": ["src/auth/mod.rs"]}))
}

#[tokio::test]
async fn test_routes_complex_and_simple_intents() {
    let h = harness(
        recognition_reply(true),
        ScriptedExecutor::new().script(REFACTOR_STEP, vec![refactor_ok()]),
        PipelineConfig::default(),
    );
    let ctx = RequestContext::new("pipe-1", "u1");
    let out = h
        .orchestrator
        .run("refactor the auth module, then create NOTES.md", &ctx)
        .await
        .unwrap();

    assert!(out.success);
    assert!(!out.cancelled);
    assert_eq!(out.fused_intents.len(), 2);
    assert_eq!(out.outcomes[0].kind, IntentKind::RefactorCode);
    assert_eq!(out.outcomes[0].route, IntentRoute::PlannedWithCorrection);
    assert_eq!(out.outcomes[0].status, OutcomeStatus::Succeeded);
    assert_eq!(out.outcomes[1].route, IntentRoute::Distilled);
    assert_eq!(out.outcomes[1].status, OutcomeStatus::Succeeded);
    assert_eq!(h.executor.call_titles(), vec![REFACTOR_STEP]);

    let filter = HistoryFilter::new().session("pipe-1");
    let pipelines: Vec<PipelineOutcome> = fetch_records(h.store.as_ref(), &filter).await.unwrap();
    let plans: Vec<HierarchicalPlan> = fetch_records(h.store.as_ref(), &filter).await.unwrap();
    let corrections: Vec<CorrectionAttempt> = fetch_records(h.store.as_ref(), &filter).await.unwrap();
    assert_eq!(pipelines.len(), 1);
    assert_eq!(plans.len(), 1);
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].attempts, 1);
}

#[tokio::test]
async fn test_failed_prerequisite_skips_dependent() {
    let h = harness(
        recognition_reply(true),
        ScriptedExecutor::new().script(REFACTOR_STEP, vec![StepScript::Err("connection reset".into())]),
        PipelineConfig::default(),
    );
    let out = h
        .orchestrator
        .run("refactor the auth module, then create NOTES.md", &RequestContext::new("pipe-2", "u1"))
        .await
        .unwrap();

    assert!(!out.success);
    assert_eq!(out.outcomes[0].status, OutcomeStatus::Failed);
    assert!(out.outcomes[0].error.as_deref().unwrap().contains("connection reset"));
    assert_eq!(out.outcomes[1].status, OutcomeStatus::Skipped);
    assert_eq!(out.outcomes[1].route, IntentRoute::Skipped);
    // One initial attempt plus one retry.
    assert_eq!(h.executor.calls().len(), 2);
}

#[tokio::test]
async fn test_independent_intents_run_in_parallel_and_keep_order() {
    let h = harness(
        recognition_reply(false),
        ScriptedExecutor::new().script(REFACTOR_STEP, vec![StepScript::Err("connection reset".into())]),
        PipelineConfig {
            parallel_independent: true,
        },
    );
    let out = h
        .orchestrator
        .run("refactor the auth module and create NOTES.md", &RequestContext::new("pipe-3", "u1"))
        .await
        .unwrap();

    assert_eq!(out.outcomes.len(), 2);
    assert_eq!(out.outcomes[0].priority, 1);
    assert_eq!(out.outcomes[0].status, OutcomeStatus::Failed);
    // No dependency, so the failure does not block it.
    assert_eq!(out.outcomes[1].priority, 2);
    assert_eq!(out.outcomes[1].status, OutcomeStatus::Succeeded);
    assert!(!out.success);
}

#[tokio::test]
async fn test_cancelled_request_stops_between_stages() {
    let h = harness(recognition_reply(true), ScriptedExecutor::new(), PipelineConfig::default());
    let ctx = RequestContext::new("pipe-4", "u1");
    ctx.cancel.cancel();

    let out = h.orchestrator.run("refactor and create NOTES.md", &ctx).await.unwrap();
    assert!(out.cancelled);
    assert!(!out.success);
    assert!(out.fused_intents.is_empty());
    assert!(h.executor.calls().is_empty());

    let pipelines: Vec<PipelineOutcome> =
        fetch_records(h.store.as_ref(), &HistoryFilter::new().session("pipe-4")).await.unwrap();
    assert_eq!(pipelines.len(), 1);
    assert!(pipelines[0].cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_run_writes_only_the_pipeline_record() {
    let h = harness(
        recognition_reply(true),
        ScriptedExecutor::new().script(
            REFACTOR_STEP,
            vec![StepScript::Delay(Duration::from_secs(30), json!({"changedFiles": ["a.rs"]}))],
        ),
        PipelineConfig::default(),
    );
    let ctx = RequestContext::new("pipe-5", "u1");
    let token = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    });

    let out = h
        .orchestrator
        .run("refactor the auth module, then create NOTES.md", &ctx)
        .await
        .unwrap();
    assert!(out.cancelled);
    assert_eq!(out.outcomes[0].status, OutcomeStatus::Cancelled);
    assert_eq!(out.outcomes[1].status, OutcomeStatus::Cancelled);

    let filter = HistoryFilter::new().session("pipe-5");
    let pipelines: Vec<PipelineOutcome> = fetch_records(h.store.as_ref(), &filter).await.unwrap();
    let corrections: Vec<CorrectionAttempt> = fetch_records(h.store.as_ref(), &filter).await.unwrap();
    let checkpoints: Vec<CheckpointValidation> = fetch_records(h.store.as_ref(), &filter).await.unwrap();
    let distillations: Vec<DistillationRecord> = fetch_records(h.store.as_ref(), &filter).await.unwrap();
    assert_eq!(pipelines.len(), 1);
    assert!(pipelines[0].cancelled);
    assert!(corrections.is_empty());
    assert!(checkpoints.is_empty());
    assert!(distillations.is_empty());
}

#[tokio::test]
async fn test_empty_text_is_rejected() {
    let h = harness(recognition_reply(true), ScriptedExecutor::new(), PipelineConfig::default());
    assert!(h.orchestrator.run("  ", &RequestContext::anonymous()).await.is_err());
}
