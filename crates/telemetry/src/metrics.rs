//! Metrics implementation using Prometheus.
//!
//! Helpers are no-ops until a recorder is installed, so library code can call
//! them unconditionally.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use intentflow_core::{Error, Result};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::internal(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Helper to track HTTP request metrics (latency, count).
pub fn track_request(method: &str, path: &str, status: u16, latency_sec: f64) {
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(latency_sec);
}

/// Helper to track token usage.
pub fn track_tokens(tier: &str, prompt: u64, completion: u64) {
    metrics::counter!("intentflow_llm_tokens_total", "tier" => tier.to_string(), "type" => "prompt").increment(prompt);
    metrics::counter!("intentflow_llm_tokens_total", "tier" => tier.to_string(), "type" => "completion")
        .increment(completion);
}

/// One `fuse_intents` call.
pub fn track_fusion(strategy: &str, original: usize, fused: usize) {
    metrics::counter!("intentflow_fusion_total", "strategy" => strategy.to_string()).increment(1);
    metrics::counter!("intentflow_fusion_llm_calls_saved_total").increment(original.saturating_sub(fused) as u64);
    if original > 0 {
        let rate = (original - fused.min(original)) as f64 / original as f64;
        metrics::histogram!("intentflow_fusion_reduction_rate").record(rate);
    }
}

/// One routed execution.
pub fn track_route(level: &str, planned: &str, actual: &str, used_fallback: bool, score: f64) {
    metrics::counter!(
        "intentflow_distillation_routes_total",
        "level" => level.to_string(),
        "planned" => planned.to_string(),
        "actual" => actual.to_string()
    )
    .increment(1);
    if used_fallback {
        metrics::counter!("intentflow_distillation_fallbacks_total").increment(1);
    }
    metrics::histogram!("intentflow_distillation_complexity_score").record(score);
}

/// One checkpoint verdict.
pub fn track_checkpoint(recommendation: &str) {
    metrics::counter!("intentflow_checkpoint_total", "recommendation" => recommendation.to_string()).increment(1);
}

/// One finished correction loop.
pub fn track_correction(success: bool, attempts: u32, cancelled: bool) {
    let outcome = if cancelled {
        "cancelled"
    } else if success {
        "success"
    } else {
        "failed"
    };
    metrics::counter!("intentflow_correction_runs_total", "outcome" => outcome).increment(1);
    metrics::histogram!("intentflow_correction_attempts").record(f64::from(attempts));
}

/// One full pipeline run.
pub fn track_pipeline(success: bool, intents: usize, latency_sec: f64) {
    let outcome = if success { "success" } else { "failed" };
    metrics::counter!("intentflow_pipeline_runs_total", "outcome" => outcome).increment(1);
    metrics::histogram!("intentflow_pipeline_intents").record(intents as f64);
    metrics::histogram!("intentflow_pipeline_duration_seconds").record(latency_sec);
}
