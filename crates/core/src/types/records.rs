use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::complexity::{ComplexityAssessment, ComplexityFeatures, ComplexityLevel, ModelTier};
use super::history::{RecordKind, Recordable};
use super::intent::Intent;
use crate::context::RequestContext;

// =============================================================================
// Fusion Records
// =============================================================================

/// Which fusion phase produced the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionStrategy {
    Rule,
    Llm,
    /// Both phases merged something.
    Hybrid,
}

impl FusionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Llm => "llm",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one `fuse_intents` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionRecord {
    pub session_id: String,
    pub user_id: String,
    pub original_intents: Vec<Intent>,
    pub fused_intents: Vec<Intent>,
    /// Absent when nothing merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<FusionStrategy>,
    pub original_count: usize,
    pub fused_count: usize,
    pub reduction_rate: f64,
    pub llm_calls_saved: usize,
    pub created_at: DateTime<Utc>,
}

impl FusionRecord {
    pub fn new(
        ctx: &RequestContext,
        original: &[Intent],
        fused: &[Intent],
        strategy: Option<FusionStrategy>,
    ) -> Self {
        let original_count = original.len();
        let fused_count = fused.len();
        let reduction_rate = if original_count == 0 {
            0.0
        } else {
            (original_count - fused_count.min(original_count)) as f64 / original_count as f64
        };
        Self {
            session_id: ctx.session_id.clone(),
            user_id: ctx.user_id.clone(),
            original_intents: original.to_vec(),
            fused_intents: fused.to_vec(),
            strategy,
            original_count,
            fused_count,
            reduction_rate,
            llm_calls_saved: original_count.saturating_sub(fused_count),
            created_at: Utc::now(),
        }
    }
}

impl Recordable for FusionRecord {
    const KIND: RecordKind = RecordKind::Fusion;
}

// =============================================================================
// Distillation Types
// =============================================================================

/// A unit of work handed to the complexity router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Stable id, copied into the distillation record.
    #[serde(default = "new_task_id")]
    pub task_id: String,
    /// Natural-language description of what to do.
    #[serde(default)]
    pub description: String,
    /// Intents the task covers.
    #[serde(default)]
    pub intents: Vec<Intent>,
    /// Free-form context (conversation excerpt, file contents, ...).
    #[serde(default)]
    pub context: Option<String>,
}

fn new_task_id() -> String {
    Uuid::new_v4().to_string()
}

impl Task {
    /// Task from a description.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            task_id: new_task_id(),
            description: description.into(),
            intents: Vec::new(),
            context: None,
        }
    }

    /// Task covering a single intent.
    pub fn from_intent(intent: Intent) -> Self {
        let description = describe_intent(&intent);
        Self {
            task_id: new_task_id(),
            description,
            intents: vec![intent],
            context: None,
        }
    }

    pub fn with_intents(mut self, intents: Vec<Intent>) -> Self {
        self.intents = intents;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// A task with neither a description nor intents.
    pub fn is_empty(&self) -> bool {
        self.description.trim().is_empty() && self.intents.is_empty()
    }
}

/// One-line description of an intent for prompts.
pub fn describe_intent(intent: &Intent) -> String {
    if intent.params.is_empty() {
        intent.kind.to_string()
    } else {
        format!("{} {}", intent.kind, Value::Object(intent.params.clone()))
    }
}

/// Routing metadata attached to a distilled result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistillationMeta {
    pub model_used: ModelTier,
    pub complexity: ComplexityAssessment,
    pub used_fallback: bool,
}

/// Executor output plus routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistilledResult {
    pub result: Value,
    #[serde(rename = "_distillation")]
    pub distillation: DistillationMeta,
}

/// Outcome of one routed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistillationRecord {
    pub task_id: String,
    pub complexity_level: ComplexityLevel,
    pub complexity_score: f64,
    pub features: ComplexityFeatures,
    pub planned_model: ModelTier,
    pub actual_model: ModelTier,
    pub used_fallback: bool,
    /// Quality of the small-tier result, when one was assessed.
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub quality_issues: Vec<String>,
    pub route_reason: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Recordable for DistillationRecord {
    const KIND: RecordKind = RecordKind::Distillation;
}

/// Quality verdict on a model result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub score: f64,
    pub issues: Vec<String>,
}

impl QualityAssessment {
    pub fn failed(issue: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            issues: vec![issue.into()],
        }
    }
}
