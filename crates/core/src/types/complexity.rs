use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Complexity & Routing Types
// =============================================================================

/// Coarse complexity bucket derived from a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Simple,
    Medium,
    Complex,
}

impl ComplexityLevel {
    /// Step function from score to level.
    pub fn from_score(score: f64, simple_below: f64, complex_at: f64) -> Self {
        if score < simple_below {
            Self::Simple
        } else if score >= complex_at {
            Self::Complex
        } else {
            Self::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }
}

impl fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized feature vector; every field is in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityFeatures {
    pub intent_count: f64,
    pub parameter_complexity: f64,
    pub task_type_signal: f64,
    pub context_size: f64,
}

/// Feature names in a stable order, used for learning buckets.
pub const FEATURE_NAMES: [&str; 4] = [
    "intent_count",
    "parameter_complexity",
    "task_type_signal",
    "context_size",
];

impl ComplexityFeatures {
    /// Values in [`FEATURE_NAMES`] order.
    pub fn values(&self) -> [f64; 4] {
        [
            self.intent_count,
            self.parameter_complexity,
            self.task_type_signal,
            self.context_size,
        ]
    }

    /// Names of the features at or above `threshold`.
    pub fn active(&self, threshold: f64) -> Vec<&'static str> {
        FEATURE_NAMES
            .iter()
            .zip(self.values())
            .filter(|(_, v)| *v >= threshold)
            .map(|(name, _)| *name)
            .collect()
    }
}

/// Per-feature weights of the complexity score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureWeights {
    pub intent_count: f64,
    pub parameter_complexity: f64,
    pub task_type: f64,
    pub context: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            intent_count: 0.25,
            parameter_complexity: 0.15,
            task_type: 0.5,
            context: 0.10,
        }
    }
}

impl FeatureWeights {
    /// Weighted sum clamped into [0, 1].
    pub fn score(&self, f: &ComplexityFeatures) -> f64 {
        let raw = self.intent_count * f.intent_count
            + self.parameter_complexity * f.parameter_complexity
            + self.task_type * f.task_type_signal
            + self.context * f.context_size;
        raw.clamp(0.0, 1.0)
    }

    /// Mutable access by feature name.
    pub fn get_mut(&mut self, feature: &str) -> Option<&mut f64> {
        match feature {
            "intent_count" => Some(&mut self.intent_count),
            "parameter_complexity" => Some(&mut self.parameter_complexity),
            "task_type_signal" => Some(&mut self.task_type),
            "context_size" => Some(&mut self.context),
            _ => None,
        }
    }
}

/// Score, level and the features that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityAssessment {
    pub score: f64,
    pub level: ComplexityLevel,
    pub features: ComplexityFeatures,
}

/// Model tier a task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Cheap, fast model.
    Small,
    /// Capable, expensive model.
    Large,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Large => "large",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_step_function() {
        assert_eq!(ComplexityLevel::from_score(0.0, 0.3, 0.6), ComplexityLevel::Simple);
        assert_eq!(ComplexityLevel::from_score(0.299, 0.3, 0.6), ComplexityLevel::Simple);
        assert_eq!(ComplexityLevel::from_score(0.3, 0.3, 0.6), ComplexityLevel::Medium);
        assert_eq!(ComplexityLevel::from_score(0.6, 0.3, 0.6), ComplexityLevel::Complex);
    }

    #[test]
    fn test_score_is_clamped() {
        let w = FeatureWeights { intent_count: 1.0, parameter_complexity: 1.0, task_type: 1.0, context: 1.0 };
        let f = ComplexityFeatures { intent_count: 1.0, parameter_complexity: 1.0, task_type_signal: 1.0, context_size: 1.0 };
        assert_eq!(w.score(&f), 1.0);
    }

    #[test]
    fn test_active_features() {
        let f = ComplexityFeatures { intent_count: 0.5, parameter_complexity: 0.05, task_type_signal: 1.0, context_size: 0.0 };
        assert_eq!(f.active(0.1), vec!["intent_count", "task_type_signal"]);
    }
}
