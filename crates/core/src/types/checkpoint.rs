use serde::{Deserialize, Serialize};

use super::history::{RecordKind, Recordable};

// =============================================================================
// Checkpoint Types
// =============================================================================

/// What the pipeline should do after a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Continue,
    Retry,
    Abort,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Retry => "retry",
            Self::Abort => "abort",
        }
    }
}

/// Which check produced a validation item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Existence,
    ExpectedOutput,
    LlmQuality,
}

/// One check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationItem {
    pub check: CheckKind,
    /// Output field the check looked at, for expected-output checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub passed: bool,
    pub critical: bool,
    pub message: String,
    /// Score reported by the LLM quality check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl ValidationItem {
    pub fn pass(check: CheckKind, message: impl Into<String>) -> Self {
        Self {
            check,
            field: None,
            passed: true,
            critical: false,
            message: message.into(),
            score: None,
        }
    }

    pub fn fail(check: CheckKind, critical: bool, message: impl Into<String>) -> Self {
        Self {
            check,
            field: None,
            passed: false,
            critical,
            message: message.into(),
            score: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

/// Verdict on one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointValidation {
    pub step_index: usize,
    pub step_title: String,
    pub passed: bool,
    pub failed_count: usize,
    pub critical_failures: usize,
    pub validations: Vec<ValidationItem>,
    pub recommendation: Recommendation,
}

impl CheckpointValidation {
    /// Summarize a list of check results.
    pub fn from_items(step_index: usize, step_title: impl Into<String>, validations: Vec<ValidationItem>) -> Self {
        let failed_count = validations.iter().filter(|v| !v.passed).count();
        let critical_failures = validations.iter().filter(|v| !v.passed && v.critical).count();
        let recommendation = if failed_count == 0 {
            Recommendation::Continue
        } else if critical_failures > 0 {
            Recommendation::Abort
        } else {
            Recommendation::Retry
        };
        Self {
            step_index,
            step_title: step_title.into(),
            passed: failed_count == 0,
            failed_count,
            critical_failures,
            validations,
            recommendation,
        }
    }

    /// Messages of the failed checks, joined for diagnostics.
    pub fn failure_summary(&self) -> String {
        self.validations
            .iter()
            .filter(|v| !v.passed)
            .map(|v| v.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Recordable for CheckpointValidation {
    const KIND: RecordKind = RecordKind::Checkpoint;
}

/// Per-call checkpoint options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointOptions {
    pub skip_llm_check: bool,
    /// Overrides the configured LLM quality threshold.
    pub quality_threshold: Option<f64>,
}

impl CheckpointOptions {
    pub fn skip_llm() -> Self {
        Self {
            skip_llm_check: true,
            quality_threshold: None,
        }
    }
}
