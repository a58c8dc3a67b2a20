use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::complexity::ComplexityLevel;
use super::history::{RecordKind, Recordable};
use super::intent::{Intent, MultiIntentResult};
use super::kind::IntentKind;

// =============================================================================
// Pipeline Types
// =============================================================================

/// Path a fused intent took through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentRoute {
    /// Executed directly by the complexity router.
    Distilled,
    /// Expanded by the planner and run under self-correction.
    PlannedWithCorrection,
    /// Not run.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    /// A prerequisite failed.
    Skipped,
    Cancelled,
}

/// Result for one fused intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentOutcome {
    pub priority: u32,
    pub kind: IntentKind,
    pub route: IntentRoute,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<ComplexityLevel>,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntentOutcome {
    pub fn skipped(intent: &Intent, reason: impl Into<String>) -> Self {
        Self {
            priority: intent.priority,
            kind: intent.kind.clone(),
            route: IntentRoute::Skipped,
            complexity: None,
            status: OutcomeStatus::Skipped,
            output: None,
            error: Some(reason.into()),
        }
    }

    pub fn cancelled(intent: &Intent) -> Self {
        Self {
            status: OutcomeStatus::Cancelled,
            ..Self::skipped(intent, "request cancelled")
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }
}

/// Request to run the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    pub text: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Result of a full pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub session_id: String,
    pub recognition: MultiIntentResult,
    pub fused_intents: Vec<Intent>,
    pub outcomes: Vec<IntentOutcome>,
    pub success: bool,
    pub cancelled: bool,
}

impl Recordable for PipelineOutcome {
    const KIND: RecordKind = RecordKind::Pipeline;
}
