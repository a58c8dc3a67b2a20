use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::history::{RecordKind, Recordable};
use super::intent::Intent;
use super::kind::IntentKind;

// =============================================================================
// Planning Types
// =============================================================================

/// How deep the planner decomposes an intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Chosen from the intent's complexity.
    #[default]
    Auto,
    /// Business layer only.
    Coarse,
    /// Business and technical layers.
    Medium,
    /// All three layers.
    Fine,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Coarse => "coarse",
            Self::Medium => "medium",
            Self::Fine => "fine",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "coarse" => Some(Self::Coarse),
            "medium" => Some(Self::Medium),
            "fine" => Some(Self::Fine),
            _ => None,
        }
    }

    /// Number of layers this granularity populates (0 for `Auto`).
    pub fn depth(&self) -> usize {
        match self {
            Self::Auto => 0,
            Self::Coarse => 1,
            Self::Medium => 2,
            Self::Fine => 3,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plan layer names in decomposition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanLayer {
    Business,
    Technical,
    Execution,
}

impl PlanLayer {
    pub const ORDER: [PlanLayer; 3] = [Self::Business, Self::Technical, Self::Execution];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Business => "business",
            Self::Technical => "technical",
            Self::Execution => "execution",
        }
    }
}

/// One step of a plan layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub title: String,
    /// Tool kind the step invokes, if the planner named one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<IntentKind>,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Output fields the step must report; empty defers to the tool schema.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_outputs: Vec<String>,
}

impl PlanStep {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            tool: None,
            params: Map::new(),
            expected_outputs: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: IntentKind) -> Self {
        self.tool = Some(tool);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_expected_outputs(mut self, outputs: &[&str]) -> Self {
        self.expected_outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Outputs a checkpoint should look for.
    pub fn required_outputs(&self) -> Vec<String> {
        if !self.expected_outputs.is_empty() {
            return self.expected_outputs.clone();
        }
        self.tool
            .as_ref()
            .map(|t| t.schema().outputs.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default()
    }
}

/// The three decomposition layers; unpopulated layers are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanLayers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business: Option<Vec<PlanStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical: Option<Vec<PlanStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<Vec<PlanStep>>,
}

impl PlanLayers {
    pub fn get(&self, layer: PlanLayer) -> Option<&Vec<PlanStep>> {
        match layer {
            PlanLayer::Business => self.business.as_ref(),
            PlanLayer::Technical => self.technical.as_ref(),
            PlanLayer::Execution => self.execution.as_ref(),
        }
    }

    pub fn set(&mut self, layer: PlanLayer, steps: Vec<PlanStep>) {
        match layer {
            PlanLayer::Business => self.business = Some(steps),
            PlanLayer::Technical => self.technical = Some(steps),
            PlanLayer::Execution => self.execution = Some(steps),
        }
    }

    /// Sum of steps over populated layers.
    pub fn total_steps(&self) -> usize {
        PlanLayer::ORDER
            .iter()
            .filter_map(|l| self.get(*l))
            .map(Vec::len)
            .sum()
    }

    /// Deepest populated layer.
    pub fn deepest(&self) -> Option<&Vec<PlanStep>> {
        self.execution
            .as_ref()
            .or(self.technical.as_ref())
            .or(self.business.as_ref())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub total_steps: usize,
}

/// Layered decomposition of one intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchicalPlan {
    pub intent: Intent,
    /// Granularity the caller asked for.
    pub granularity: Granularity,
    /// Granularity actually used (never `Auto`).
    pub resolved_granularity: Granularity,
    pub layers: PlanLayers,
    pub summary: PlanSummary,
}

impl HierarchicalPlan {
    /// Executable steps: execution layer, else technical, else business.
    pub fn execution_steps(&self) -> Vec<PlanStep> {
        self.layers.deepest().cloned().unwrap_or_default()
    }

    /// Convert to a flat plan the correction loop can run.
    pub fn to_task_plan(&self) -> TaskPlan {
        TaskPlan {
            description: super::records::describe_intent(&self.intent),
            steps: self.execution_steps(),
        }
    }
}

impl Recordable for HierarchicalPlan {
    const KIND: RecordKind = RecordKind::Plan;
}

/// Ordered executable steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPlan {
    pub description: String,
    pub steps: Vec<PlanStep>,
}

impl TaskPlan {
    pub fn new(description: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            description: description.into(),
            steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(layers: PlanLayers) -> HierarchicalPlan {
        HierarchicalPlan {
            intent: Intent::new(IntentKind::RefactorCode),
            granularity: Granularity::Auto,
            resolved_granularity: Granularity::Medium,
            summary: PlanSummary { total_steps: layers.total_steps() },
            layers,
        }
    }

    #[test]
    fn test_total_steps_sums_populated_layers() {
        let mut layers = PlanLayers::default();
        layers.set(PlanLayer::Business, vec![PlanStep::new("a"), PlanStep::new("b")]);
        layers.set(PlanLayer::Technical, vec![PlanStep::new("c")]);
        assert_eq!(layers.total_steps(), 3);
    }

    #[test]
    fn test_task_plan_uses_deepest_layer() {
        let mut layers = PlanLayers::default();
        layers.set(PlanLayer::Business, vec![PlanStep::new("goal")]);
        layers.set(PlanLayer::Technical, vec![PlanStep::new("t1"), PlanStep::new("t2")]);
        let task = plan_with(layers).to_task_plan();
        assert_eq!(task.steps.len(), 2);
        assert_eq!(task.steps[0].title, "t1");
    }

    #[test]
    fn test_required_outputs_fall_back_to_schema() {
        let step = PlanStep::new("commit").with_tool(IntentKind::GitCommit);
        assert_eq!(step.required_outputs(), vec!["commitHash".to_string()]);
        let step = step.with_expected_outputs(&["sha"]);
        assert_eq!(step.required_outputs(), vec!["sha".to_string()]);
    }

    #[test]
    fn test_granularity_parse() {
        assert_eq!(Granularity::parse("FINE"), Some(Granularity::Fine));
        assert_eq!(Granularity::parse("huge"), None);
    }
}
