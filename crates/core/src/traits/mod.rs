//! Core traits for IntentFlow.
//!
//! Traits are organized by architectural layer:
//! - `gateway`: recognition (IntentClassifier)
//! - `llm`: model gateway (LlmClient, ModelExecutor)
//! - `tools`: step execution (StepExecutor)
//! - `controller`: pipeline orchestration (Orchestrator)
//! - `store`: history persistence (HistoryStore)

pub mod controller;
pub mod gateway;
pub mod llm;
pub mod store;
pub mod tools;

pub use controller::*;
pub use gateway::*;
pub use llm::*;
pub use store::*;
pub use tools::*;
