//! Axum-based HTTP server for the gateway.

use axum::{
    extract::{Json, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use intentflow_core::{
    call::bounded,
    config::ServerConfig,
    traits::{HistoryStore, Orchestrator},
    types::{HistoryFilter, Intent, MultiIntentResult, PipelineRequest},
    Error, RequestContext, Result,
};
use intentflow_model_gateway::DistillationRouter;
use intentflow_store::{correction_stats, fusion_stats, MAX_STATS_DAYS};

use crate::fusion::IntentFusion;
use crate::recognizer::MultiIntentRecognizer;

/// Window used by `/v1/stats/correction` when `days` is absent.
const DEFAULT_STATS_DAYS: u32 = 7;

/// Shared application state.
pub struct AppState {
    /// Full pipeline.
    pub orchestrator: Arc<dyn Orchestrator>,
    pub recognizer: Arc<MultiIntentRecognizer>,
    pub fusion: Arc<IntentFusion>,
    /// Complexity router, for stats and learning.
    pub router: Arc<DistillationRouter>,
    pub store: Arc<dyn HistoryStore>,
    /// Deadline for one `/v1/requests` run.
    pub request_timeout: Duration,
}

/// Gateway server.
pub struct GatewayServer {
    config: ServerConfig,
    state: Arc<AppState>,
    metrics_handle: Option<PrometheusHandle>,
}

impl GatewayServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
            metrics_handle: None,
        }
    }

    /// Set metrics handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/v1/requests", post(requests_handler))
            .route("/v1/intents", post(intents_handler))
            .route("/v1/stats/fusion", get(fusion_stats_handler))
            .route("/v1/stats/distillation", get(distillation_stats_handler))
            .route("/v1/stats/correction", get(correction_stats_handler))
            .route("/v1/distillation/learn", post(learn_handler))
            .route("/v1/distillation/weights", get(weights_handler))
            .with_state(self.state.clone());

        if let Some(handle) = &self.metrics_handle {
            let handle = handle.clone();
            router = router.route("/metrics", get(move || async move { handle.render() }));
        }

        router
            .layer(middleware::from_fn(track_metrics))
            .layer(self.cors_layer())
            .layer(TraceLayer::new_for_http())
    }

    fn cors_layer(&self) -> CorsLayer {
        let origins = &self.config.allowed_origins;
        let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            return cors.allow_origin(Any);
        }
        let list: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        cors.allow_origin(AllowOrigin::list(list))
    }

    /// Run the server.
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::internal(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!(addr = %addr, "Gateway server starting");

        axum::serve(listener, self.build_router())
            .await
            .map_err(|e| Error::internal(format!("Server error: {}", e)))?;

        Ok(())
    }
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;
    intentflow_telemetry::track_request(&method, &path, response.status().as_u16(), start.elapsed().as_secs_f64());
    response
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Recognize-and-fuse response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentsResponse {
    pub trace_id: String,
    pub recognition: MultiIntentResult,
    pub fused_intents: Vec<Intent>,
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub trace_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FusionStatsQuery {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CorrectionStatsQuery {
    pub days: Option<u32>,
}

/// Error carried out of a handler.
pub struct ApiError {
    error: Error,
    trace_id: Option<String>,
}

impl ApiError {
    fn traced(error: Error, trace_id: &str) -> Self {
        Self {
            error,
            trace_id: Some(trace_id.to_string()),
        }
    }

    fn status(&self) -> (StatusCode, &'static str) {
        match &self.error {
            Error::InvalidRequest(_) | Error::InvalidIntent(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            Error::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            Error::Cancelled(_) => (StatusCode::SERVICE_UNAVAILABLE, "CANCELLED"),
            Error::ModelProvider(_) => (StatusCode::BAD_GATEWAY, "MODEL_PROVIDER_ERROR"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self { error, trace_id: None }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        if status.is_server_error() {
            tracing::error!(trace_id = ?self.trace_id, error = %self.error, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message: self.error.to_string(),
                trace_id: self.trace_id,
            }),
        )
            .into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn request_context(payload: &PipelineRequest) -> RequestContext {
    let session = payload
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let user = payload.user_id.clone().unwrap_or_else(|| "anonymous".to_string());
    RequestContext::new(session, user).with_user_input(payload.text.clone())
}

/// Full pipeline run.
async fn requests_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PipelineRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let trace_id = Uuid::new_v4().to_string();
    let ctx = request_context(&payload);

    tracing::info!(
        trace_id = %trace_id,
        session_id = %ctx.session_id,
        text_len = payload.text.len(),
        "Processing pipeline request"
    );

    let outcome = bounded(
        "pipeline",
        state.request_timeout,
        &ctx.cancel,
        state.orchestrator.run(&payload.text, &ctx),
    )
    .await
    .map_err(|e| {
        ctx.cancel.cancel();
        ApiError::traced(e, &trace_id)
    })?;

    Ok(Json(outcome))
}

/// Recognize and fuse without executing.
async fn intents_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PipelineRequest>,
) -> std::result::Result<Json<IntentsResponse>, ApiError> {
    let trace_id = Uuid::new_v4().to_string();
    let ctx = request_context(&payload);

    let recognition = state
        .recognizer
        .classify_multiple(&payload.text, &ctx)
        .await
        .map_err(|e| ApiError::traced(e, &trace_id))?;
    let fused_intents = state
        .fusion
        .fuse_intents(&recognition.intents, &ctx)
        .await
        .map_err(|e| ApiError::traced(e, &trace_id))?;

    Ok(Json(IntentsResponse {
        trace_id,
        recognition,
        fused_intents,
    }))
}

async fn fusion_stats_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FusionStatsQuery>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let mut filter = HistoryFilter::new();
    if let Some(session) = query.session_id {
        filter = filter.session(session);
    }
    if let Some(user) = query.user_id {
        filter = filter.user(user);
    }
    if let Some(since) = query.since {
        filter = filter.since(since);
    }
    Ok(Json(fusion_stats(state.store.as_ref(), &filter).await?))
}

async fn distillation_stats_handler(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    Ok(Json(state.router.get_distillation_stats().await?))
}

async fn correction_stats_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CorrectionStatsQuery>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let days = query.days.unwrap_or(DEFAULT_STATS_DAYS);
    if days > MAX_STATS_DAYS {
        return Err(Error::invalid_request(format!("days must be between 0 and {}", MAX_STATS_DAYS)).into());
    }
    Ok(Json(correction_stats(state.store.as_ref(), days).await?))
}

async fn learn_handler(State(state): State<Arc<AppState>>) -> std::result::Result<impl IntoResponse, ApiError> {
    Ok(Json(state.router.learn_from_history().await?))
}

async fn weights_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json((*state.router.weights()).clone())
}
