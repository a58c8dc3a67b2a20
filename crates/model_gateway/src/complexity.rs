//! Task complexity features and scoring.

use serde_json::Value;

use intentflow_core::{
    config::DistillationConfig,
    types::{describe_intent, ComplexityAssessment, ComplexityFeatures, ComplexityLevel, FeatureWeights, Intent, Task},
};

/// Keywords marking work that needs a capable model.
const HEAVY_KEYWORDS: &[&str] = &[
    "analyze",
    "analyse",
    "refactor",
    "security",
    "vulnerab",
    "optimiz",
    "optimis",
    "performance",
    "architecture",
    "migrat",
];

/// Keywords for moderately involved work.
const MEDIUM_KEYWORDS: &[&str] = &["build", "compile", "test", "report", "export", "deploy"];

/// Context length that saturates the `context_size` feature.
const CONTEXT_SATURATION_CHARS: f64 = 4000.0;

/// Computes features and maps weighted scores onto levels.
#[derive(Debug, Clone, Copy)]
pub struct ComplexityAnalyzer {
    simple_threshold: f64,
    complex_threshold: f64,
}

impl ComplexityAnalyzer {
    pub fn new(simple_threshold: f64, complex_threshold: f64) -> Self {
        Self {
            simple_threshold,
            complex_threshold,
        }
    }

    pub fn from_config(config: &DistillationConfig) -> Self {
        Self::new(config.simple_threshold, config.complex_threshold)
    }

    /// Extract the normalized feature vector of a task.
    pub fn features(&self, task: &Task) -> ComplexityFeatures {
        let n = task.intents.len().max(1);
        ComplexityFeatures {
            intent_count: ((n - 1) as f64 / 4.0).clamp(0.0, 1.0),
            parameter_complexity: parameter_complexity(&task.intents),
            task_type_signal: task_type_signal(task),
            context_size: context_size(task),
        }
    }

    /// Score a task under the given weights.
    pub fn assess(&self, task: &Task, weights: &FeatureWeights) -> ComplexityAssessment {
        let features = self.features(task);
        let score = weights.score(&features);
        ComplexityAssessment {
            score,
            level: ComplexityLevel::from_score(score, self.simple_threshold, self.complex_threshold),
            features,
        }
    }
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self::from_config(&DistillationConfig::default())
    }
}

/// Leaf count and nesting depth across all intent params.
fn parameter_complexity(intents: &[Intent]) -> f64 {
    let mut leaves = 0usize;
    let mut depth = 0usize;
    for intent in intents {
        for value in intent.params.values() {
            leaves += leaf_count(value);
            depth = depth.max(nesting_depth(value));
        }
    }
    let leaf_part = (leaves as f64 / 20.0).min(1.0);
    let depth_part = (depth as f64 / 4.0).min(1.0);
    leaf_part * 0.7 + depth_part * 0.3
}

fn leaf_count(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.values().map(leaf_count).sum(),
        Value::Array(items) => items.iter().map(leaf_count).sum(),
        _ => 1,
    }
}

fn nesting_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(nesting_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(nesting_depth).max().unwrap_or(0),
        _ => 0,
    }
}

fn keyword_signal(text: &str) -> f64 {
    let lower = text.to_lowercase();
    if HEAVY_KEYWORDS.iter().any(|k| lower.contains(k)) {
        1.0
    } else if MEDIUM_KEYWORDS.iter().any(|k| lower.contains(k)) {
        0.5
    } else {
        0.0
    }
}

fn intent_signal(intent: &Intent) -> f64 {
    if intent.kind.is_heavy() {
        return 1.0;
    }
    let kind_signal: f64 = if intent.kind.is_compound() { 0.5 } else { 0.0 };
    kind_signal.max(keyword_signal(&describe_intent(intent)))
}

/// Blend of the strongest and the average per-intent signal.
fn task_type_signal(task: &Task) -> f64 {
    let description = keyword_signal(&task.description);
    if task.intents.is_empty() {
        return description;
    }
    let values: Vec<f64> = task.intents.iter().map(intent_signal).collect();
    let max = values.iter().copied().fold(description, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (0.5 * max + 0.5 * mean).clamp(0.0, 1.0)
}

fn context_size(task: &Task) -> f64 {
    let chars = task.description.chars().count() + task.context.as_deref().map_or(0, |c| c.chars().count());
    (chars as f64 / CONTEXT_SATURATION_CHARS).min(1.0)
}
