use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use intentflow_core::{
    config::{DistillationConfig, FusionConfig, ServerConfig},
    mocks::{MockLlm, MockModelExecutor},
    traits::Orchestrator,
    types::{MultiIntentResult, PipelineOutcome},
    Intent, IntentKind, RequestContext, Result,
};
use intentflow_gateway::{AppState, GatewayServer, IntentFusion, MultiIntentRecognizer};
use intentflow_model_gateway::DistillationRouter;
use intentflow_store::InMemoryHistoryStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Orchestrator that echoes a single intent back, optionally after a delay.
struct EchoOrchestrator {
    delay: Duration,
}

#[async_trait]
impl Orchestrator for EchoOrchestrator {
    async fn run(&self, text: &str, ctx: &RequestContext) -> Result<PipelineOutcome> {
        tokio::time::sleep(self.delay).await;
        let intent = Intent::new(IntentKind::Search).with_param("query", text);
        Ok(PipelineOutcome {
            session_id: ctx.session_id.clone(),
            recognition: MultiIntentResult::single(intent.clone()),
            fused_intents: vec![intent],
            outcomes: Vec::new(),
            success: true,
            cancelled: false,
        })
    }
}

fn multi_intent_reply() -> String {
    json!({
        "isMultiIntent": true,
        "intents": [
            {"type": "CREATE_FILE", "params": {"filePath": "README.md"}, "priority": 1, "dependencies": []},
            {"type": "WRITE_FILE", "params": {"filePath": "README.md", "content": "# Hello"}, "priority": 2, "dependencies": [1]}
        ]
    })
    .to_string()
}

fn app_with(delay: Duration, request_timeout: Duration) -> Router {
    let store = Arc::new(InMemoryHistoryStore::new());
    let recognizer = MultiIntentRecognizer::new(Arc::new(MockLlm::constant(&multi_intent_reply())));
    let fusion = IntentFusion::new(
        FusionConfig {
            enable_llm_fusion: false,
            ..FusionConfig::default()
        },
        store.clone(),
    );
    let executor = Arc::new(MockModelExecutor::new(
        json!({"filePath": "a.txt", "confidence": 0.9}),
        json!({"filePath": "a.txt"}),
    ));
    let router = DistillationRouter::new(DistillationConfig::default(), executor, store.clone());

    let state = AppState {
        orchestrator: Arc::new(EchoOrchestrator { delay }),
        recognizer: Arc::new(recognizer),
        fusion: Arc::new(fusion),
        router: Arc::new(router),
        store,
        request_timeout,
    };
    GatewayServer::new(ServerConfig::default(), state).build_router()
}

fn app() -> Router {
    app_with(Duration::ZERO, Duration::from_secs(5))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (status, body) = send(&app(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_intents_endpoint_recognizes_and_fuses() {
    let app = app();
    let (status, body) = send(
        &app,
        post_json(
            "/v1/intents",
            json!({"text": "create README.md and write # Hello into it", "sessionId": "s-1"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recognition"]["isMultiIntent"], true);
    assert_eq!(body["recognition"]["intents"].as_array().unwrap().len(), 2);
    let fused = body["fusedIntents"].as_array().unwrap();
    assert_eq!(fused.len(), 1);
    assert_eq!(fused[0]["type"], "CREATE_AND_WRITE_FILE");
    assert!(body["traceId"].is_string());
}

#[tokio::test]
async fn test_empty_text_is_bad_request() {
    let (status, body) = send(&app(), post_json("/v1/intents", json!({"text": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_requests_endpoint_runs_pipeline() {
    let (status, body) = send(
        &app(),
        post_json("/v1/requests", json!({"text": "find rust docs", "sessionId": "s-2", "userId": "u-2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], "s-2");
    assert_eq!(body["success"], true);
    assert_eq!(body["fusedIntents"][0]["params"]["query"], "find rust docs");
}

#[tokio::test]
async fn test_requests_endpoint_times_out() {
    let app = app_with(Duration::from_secs(5), Duration::from_millis(20));
    let (status, body) = send(&app, post_json("/v1/requests", json!({"text": "slow"}))).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["code"], "TIMEOUT");
    assert!(body["trace_id"].is_string());
}

#[tokio::test]
async fn test_fusion_stats_filtered_by_session() {
    let app = app();
    for session in ["s-a", "s-a", "s-b"] {
        let (status, _) = send(
            &app,
            post_json("/v1/intents", json!({"text": "create and write README", "sessionId": session})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app, get("/v1/stats/fusion?session_id=s-a")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_fusions"], 2);
    assert_eq!(body["total_original_intents"], 4);
    assert_eq!(body["total_fused_intents"], 2);

    let (_, body) = send(&app, get("/v1/stats/fusion")).await;
    assert_eq!(body["total_fusions"], 3);
}

#[tokio::test]
async fn test_distillation_learning_and_stats_endpoints() {
    let app = app();

    let (status, body) = send(&app, get("/v1/stats/distillation")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_tasks"], 0);

    let (status, body) = send(&app, post_json("/v1/distillation/learn", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records_examined"], 0);
    assert_eq!(body["changed"], false);

    let (status, body) = send(&app, get("/v1/distillation/weights")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 0);
    assert_eq!(body["weights"]["task_type"], 0.5);
}

#[tokio::test]
async fn test_correction_stats_default_window() {
    let (status, body) = send(&app(), get("/v1/stats/correction")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["days"], 7);
    assert_eq!(body["total_runs"], 0);
}

#[tokio::test]
async fn test_correction_stats_rejects_oversized_window() {
    let (status, body) = send(&app(), get("/v1/stats/correction?days=4294967295")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");
}
