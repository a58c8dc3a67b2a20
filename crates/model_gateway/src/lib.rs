//! Model Gateway for IntentFlow.
//!
//! This crate provides:
//! - Task complexity scoring
//! - Complexity-based routing between small and large model tiers, with
//!   quality-checked fallback and weight learning from history
//! - LLM-backed task execution
//! - Rig LLM client adapter

pub mod complexity;
pub mod distillation;
pub mod providers;
pub mod rig_client;

pub use complexity::ComplexityAnalyzer;
pub use distillation::{assess_quality, BucketStat, DistillationRouter, LearningOutcome, WeightSnapshot};
pub use providers::{LlmModelExecutor, LlmStepExecutor, ModelTiers};
pub use rig_client::{tiers_from_config, RigConfig, RigLlmClient, RigProvider};
