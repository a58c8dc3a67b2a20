//! Gateway for IntentFlow.
//!
//! This crate provides the HTTP entry point for the system, plus the two
//! front stages of the pipeline: multi-intent recognition and intent fusion.

pub mod fusion;
pub mod recognizer;
pub mod server;

pub use fusion::IntentFusion;
pub use recognizer::{KeywordIntentClassifier, MultiIntentRecognizer};
pub use server::{AppState, GatewayServer};
