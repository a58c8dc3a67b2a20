//! Observability for IntentFlow.
//!
//! This crate provides:
//! - Structured logging and distributed tracing setup
//! - Prometheus metrics recorder and pipeline metric helpers

pub mod metrics;
pub mod tracing_layer;

pub use self::metrics::{
    setup_metrics_recorder, track_checkpoint, track_correction, track_fusion, track_pipeline, track_request,
    track_route, track_tokens,
};
pub use tracing_layer::configure_tracing;
