use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::kind::IntentKind;
use crate::error::{Error, Result};

// =============================================================================
// Intent Types (Recognizer / Fusion Output)
// =============================================================================

/// Confidence assumed when a producer did not report one.
pub const DEFAULT_CONFIDENCE: f64 = 1.0;

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

/// One actionable request extracted from user input.
///
/// Values are treated as immutable once produced: fusion builds new intents
/// rather than editing the ones it was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    /// What the intent asks for.
    #[serde(rename = "type")]
    pub kind: IntentKind,

    /// Action parameters.
    #[serde(default)]
    pub params: Map<String, Value>,

    /// 1-based execution order.
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Priorities this intent must wait for.
    #[serde(default)]
    pub dependencies: Vec<u32>,

    /// Classifier confidence in [0, 1].
    #[serde(default = "default_confidence")]
    pub confidence: f64,

    /// Named entities found alongside the intent (file paths, URLs, ...).
    #[serde(default)]
    pub entities: Map<String, Value>,

    /// Kinds fused into this intent; empty for recognizer output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<IntentKind>,
}

fn default_priority() -> u32 {
    1
}

impl Intent {
    /// Create an intent with no params at priority 1.
    pub fn new(kind: IntentKind) -> Self {
        Self {
            kind,
            params: Map::new(),
            priority: 1,
            dependencies: Vec::new(),
            confidence: DEFAULT_CONFIDENCE,
            entities: Map::new(),
            merged_from: Vec::new(),
        }
    }

    /// Set a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Replace all parameters.
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Set the execution priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the dependency list.
    pub fn with_dependencies(mut self, deps: Vec<u32>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Set the confidence, clamped into [0, 1].
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Record an entity.
    pub fn with_entity(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entities.insert(key.into(), value.into());
        self
    }

    /// Whether this intent came out of fusion.
    pub fn is_compound(&self) -> bool {
        self.kind.is_compound() || !self.merged_from.is_empty()
    }

    /// String parameter lookup.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// File path the intent targets, if any.
    pub fn file_path(&self) -> Option<&str> {
        self.param_str("filePath")
            .or_else(|| self.param_str("path"))
            .or_else(|| self.entities.get("filePath").and_then(Value::as_str))
    }
}

/// Validate a recognizer/fusion intent list.
///
/// Priorities must be unique, confidences must lie in [0, 1], and every
/// dependency must name a priority present in the list.
pub fn validate_intents(intents: &[Intent]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for intent in intents {
        if !(0.0..=1.0).contains(&intent.confidence) {
            return Err(Error::invalid_intent(format!(
                "{} (priority {}) has confidence {} outside [0, 1]",
                intent.kind, intent.priority, intent.confidence
            )));
        }
        if intent.priority == 0 {
            return Err(Error::invalid_intent(format!(
                "{} has priority 0; priorities are 1-based",
                intent.kind
            )));
        }
        if !seen.insert(intent.priority) {
            return Err(Error::invalid_intent(format!(
                "duplicate priority {}",
                intent.priority
            )));
        }
    }
    for intent in intents {
        for dep in &intent.dependencies {
            if !seen.contains(dep) {
                return Err(Error::invalid_intent(format!(
                    "{} (priority {}) depends on unknown priority {}",
                    intent.kind, intent.priority, dep
                )));
            }
        }
    }
    Ok(())
}

/// Result of multi-intent recognition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiIntentResult {
    /// Whether the input encoded more than one request.
    pub is_multi_intent: bool,
    /// Ordered intents.
    pub intents: Vec<Intent>,
}

impl MultiIntentResult {
    /// Single-intent result from the baseline classifier.
    pub fn single(intent: Intent) -> Self {
        Self {
            is_multi_intent: false,
            intents: vec![intent.with_priority(1).with_dependencies(Vec::new())],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_wire_format() {
        let intent = Intent::new(IntentKind::CreateFile)
            .with_param("filePath", "README.md")
            .with_priority(2)
            .with_dependencies(vec![1]);
        let v = serde_json::to_value(&intent).unwrap();
        assert_eq!(v["type"], "CREATE_FILE");
        assert_eq!(v["params"]["filePath"], "README.md");
        assert_eq!(v["dependencies"], json!([1]));
        assert!(v.get("mergedFrom").is_none());
    }

    #[test]
    fn test_intent_lenient_parse() {
        let intent: Intent = serde_json::from_value(json!({"type": "git_push"})).unwrap();
        assert_eq!(intent.kind, IntentKind::GitPush);
        assert_eq!(intent.priority, 1);
        assert!(intent.dependencies.is_empty());
    }

    #[test]
    fn test_validate_rejects_unknown_dependency() {
        let intents = vec![
            Intent::new(IntentKind::GitAdd).with_priority(1),
            Intent::new(IntentKind::GitCommit).with_priority(2).with_dependencies(vec![9]),
        ];
        assert!(matches!(validate_intents(&intents), Err(Error::InvalidIntent(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_priority() {
        let intents = vec![
            Intent::new(IntentKind::GitAdd).with_priority(1),
            Intent::new(IntentKind::GitCommit).with_priority(1),
        ];
        assert!(validate_intents(&intents).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_confidence() {
        let mut intent = Intent::new(IntentKind::Search);
        for bad in [1.5, -0.1, f64::NAN, f64::INFINITY] {
            intent.confidence = bad;
            assert!(
                matches!(validate_intents(&[intent.clone()]), Err(Error::InvalidIntent(_))),
                "confidence {}",
                bad
            );
        }
        intent.confidence = 0.0;
        assert!(validate_intents(&[intent]).is_ok());
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(Intent::new(IntentKind::Search).with_confidence(1.7).confidence, 1.0);
    }
}
