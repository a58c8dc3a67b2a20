use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::history::{RecordKind, Recordable};

// =============================================================================
// Self-Correction Types
// =============================================================================

/// Failure class found by diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPattern {
    InvalidParams,
    MissingDependency,
    PermissionDenied,
    ExternalError,
    Timeout,
    ValidationFailed,
    Unknown,
}

impl ErrorPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::MissingDependency => "missing_dependency",
            Self::PermissionDenied => "permission_denied",
            Self::ExternalError => "external_error",
            Self::Timeout => "timeout",
            Self::ValidationFailed => "validation_failed",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "invalid_params" => Self::InvalidParams,
            "missing_dependency" => Self::MissingDependency,
            "permission_denied" => Self::PermissionDenied,
            "external_error" => Self::ExternalError,
            "timeout" => Self::Timeout,
            "validation_failed" => Self::ValidationFailed,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repair action applied to the failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStrategy {
    RegenerateParams,
    SubstituteTool,
    SkipStep,
    RetryAsIs,
}

impl RepairStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegenerateParams => "regenerate_params",
            Self::SubstituteTool => "substitute_tool",
            Self::SkipStep => "skip_step",
            Self::RetryAsIs => "retry_as_is",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "regenerate_params" => Some(Self::RegenerateParams),
            "substitute_tool" => Some(Self::SubstituteTool),
            "skip_step" => Some(Self::SkipStep),
            "retry_as_is" => Some(Self::RetryAsIs),
            _ => None,
        }
    }
}

impl fmt::Display for RepairStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub pattern: ErrorPattern,
    pub reason: String,
    pub strategy: RepairStrategy,
}

/// One diagnose-and-repair cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRecord {
    pub diagnosis: Diagnosis,
    /// Human-readable list of edits made to the step.
    pub changes: Vec<String>,
    pub failed_step_index: usize,
}

/// Terminal outcome of a correction loop run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionAttempt {
    pub plan_description: String,
    pub total_steps: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub attempts: u32,
    pub corrections: Vec<CorrectionRecord>,
    pub final_success: bool,
    #[serde(default)]
    pub cancelled: bool,
    /// Output of every step, `null` for steps that never succeeded or were skipped.
    #[serde(default)]
    pub step_outputs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Recordable for CorrectionAttempt {
    const KIND: RecordKind = RecordKind::Correction;
}

/// Per-call correction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionOptions {
    pub max_retries: u32,
}

impl Default for CorrectionOptions {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_names_roundtrip() {
        for p in [
            ErrorPattern::InvalidParams,
            ErrorPattern::MissingDependency,
            ErrorPattern::PermissionDenied,
            ErrorPattern::ExternalError,
            ErrorPattern::Timeout,
            ErrorPattern::ValidationFailed,
            ErrorPattern::Unknown,
        ] {
            assert_eq!(ErrorPattern::parse(p.as_str()), p);
        }
        assert_eq!(ErrorPattern::parse("weird"), ErrorPattern::Unknown);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(RepairStrategy::parse("skip_step"), Some(RepairStrategy::SkipStep));
        assert_eq!(RepairStrategy::parse("reboot"), None);
    }
}
