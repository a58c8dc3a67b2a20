//! Controller layer for IntentFlow.
//!
//! Hierarchical planning, checkpoint validation and the self-correction
//! loop, plus the pipeline orchestrator that ties every stage together.

pub mod checkpoint;
pub mod correction;
pub mod diagnosis;
pub mod orchestrator;
pub mod planning;

pub use checkpoint::CheckpointValidator;
pub use correction::SelfCorrectionLoop;
pub use diagnosis::{diagnose_by_rules, strategy_for, FailureDiagnoser};
pub use orchestrator::PipelineOrchestrator;
pub use planning::{granularity_for, parse_steps, HierarchicalPlanner};
