//! Hierarchical task planning.
//!
//! Decomposes one intent into up to three layers (business, technical,
//! execution). Each layer is asked of the LLM with the previous layer as
//! context. Planning never executes anything.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use intentflow_core::{
    call::bounded,
    config::PlannerConfig,
    json::extract_json_block,
    persist_unless_cancelled,
    traits::{HistoryStore, LlmClient},
    types::{
        describe_intent, ComplexityLevel, FeatureWeights, Granularity, HierarchicalPlan, Intent, IntentKind,
        PlanLayer, PlanLayers, PlanStep, PlanSummary, Task,
    },
    RequestContext, Result,
};
use intentflow_model_gateway::ComplexityAnalyzer;

/// Granularity `auto` resolves to for a complexity level.
pub fn granularity_for(level: ComplexityLevel) -> Granularity {
    match level {
        ComplexityLevel::Simple => Granularity::Coarse,
        ComplexityLevel::Medium => Granularity::Medium,
        ComplexityLevel::Complex => Granularity::Fine,
    }
}

fn list_item_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(.+?)\s*$").expect("valid list item regex"))
}

fn layer_instruction(layer: PlanLayer) -> &'static str {
    match layer {
        PlanLayer::Business => "Break the goal into the business-level milestones a stakeholder would recognize.",
        PlanLayer::Technical => {
            "Break the business milestones into technical work items (components, data, interfaces)."
        }
        PlanLayer::Execution => {
            "Break the technical work items into concrete executable steps. \
             Each step is an object {\"title\", \"tool\", \"params\"}; tool is one of the known intent kinds when one applies."
        }
    }
}

/// Layered planner.
pub struct HierarchicalPlanner {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn HistoryStore>,
    config: PlannerConfig,
    analyzer: ComplexityAnalyzer,
    weights: FeatureWeights,
    llm_timeout: Duration,
}

impl HierarchicalPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            llm,
            store,
            config: PlannerConfig::default(),
            analyzer: ComplexityAnalyzer::default(),
            weights: FeatureWeights::default(),
            llm_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    /// Scoring used to resolve `auto` granularity.
    pub fn with_complexity(mut self, analyzer: ComplexityAnalyzer, weights: FeatureWeights) -> Self {
        self.analyzer = analyzer;
        self.weights = weights;
        self
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Expand `intent` into a layered plan.
    pub async fn plan(&self, intent: &Intent, ctx: &RequestContext, granularity: Granularity) -> Result<HierarchicalPlan> {
        let resolved = match granularity {
            Granularity::Auto => {
                let task = Task::from_intent(intent.clone());
                granularity_for(self.analyzer.assess(&task, &self.weights).level)
            }
            other => other,
        };

        let goal = describe_intent(intent);
        let mut layers = PlanLayers::default();
        let mut previous: Option<(PlanLayer, Vec<PlanStep>)> = None;

        for layer in PlanLayer::ORDER.iter().copied().take(resolved.depth()) {
            let steps = self.plan_layer(layer, intent, &goal, previous.as_ref(), ctx).await;
            layers.set(layer, steps.clone());
            previous = Some((layer, steps));
        }

        let plan = HierarchicalPlan {
            intent: intent.clone(),
            granularity,
            resolved_granularity: resolved,
            summary: PlanSummary {
                total_steps: layers.total_steps(),
            },
            layers,
        };

        tracing::info!(
            session_id = %ctx.session_id,
            kind = %intent.kind,
            granularity = %resolved,
            total_steps = plan.summary.total_steps,
            "Plan generated"
        );
        persist_unless_cancelled(self.store.as_ref(), ctx, &plan).await;

        Ok(plan)
    }

    async fn plan_layer(
        &self,
        layer: PlanLayer,
        intent: &Intent,
        goal: &str,
        previous: Option<&(PlanLayer, Vec<PlanStep>)>,
        ctx: &RequestContext,
    ) -> Vec<PlanStep> {
        let mut prompt = format!(
            "You are an expert planner producing the {} layer of a plan.\n{}\nGoal: {}\n",
            layer.as_str(),
            layer_instruction(layer),
            goal
        );
        if let Some((prev_layer, steps)) = previous {
            prompt.push_str(&format!("\nPrevious ({}) steps:\n", prev_layer.as_str()));
            for (i, step) in steps.iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", i + 1, step.title));
            }
        }
        prompt.push_str("\nReturn a JSON array of steps, nothing else.");

        let parsed = match bounded("planner LLM", self.llm_timeout, &ctx.cancel, self.llm.complete(&prompt)).await {
            Ok(response) => parse_steps(&response.content),
            Err(e) => {
                tracing::warn!(
                    session_id = %ctx.session_id,
                    layer = layer.as_str(),
                    error = %e,
                    "Planner LLM failed, using single-step layer"
                );
                Vec::new()
            }
        };

        if parsed.is_empty() {
            return vec![fallback_step(intent, goal)];
        }
        parsed.into_iter().take(self.config.max_steps_per_layer.max(1)).collect()
    }
}

/// One step that carries the intent itself.
fn fallback_step(intent: &Intent, goal: &str) -> PlanStep {
    let mut step = PlanStep::new(goal.to_string());
    step.params = intent.params.clone();
    if intent.kind != IntentKind::Unknown {
        step.tool = Some(intent.kind.clone());
    }
    step
}

/// Parse a step list: JSON array (strings or objects), `{"steps": [...]}`, or a numbered list.
pub fn parse_steps(text: &str) -> Vec<PlanStep> {
    if let Some(value) = extract_json_block(text).and_then(|b| serde_json::from_str::<Value>(b).ok()) {
        let items = match &value {
            Value::Array(items) => Some(items.as_slice()),
            Value::Object(map) => map.get("steps").and_then(Value::as_array).map(Vec::as_slice),
            _ => None,
        };
        if let Some(items) = items {
            return items.iter().filter_map(step_from_value).collect();
        }
    }

    text.lines()
        .filter_map(|line| list_item_regex().captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|title| !title.is_empty())
        .map(PlanStep::new)
        .collect()
}

fn step_from_value(value: &Value) -> Option<PlanStep> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(PlanStep::new(s.trim())),
        Value::Object(map) => {
            let title = ["title", "description", "step", "name"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .filter(|t| !t.is_empty())?;
            let mut step = PlanStep::new(title);
            step.tool = map
                .get("tool")
                .and_then(Value::as_str)
                .map(IntentKind::from_name)
                .filter(|k| *k != IntentKind::Unknown);
            step.params = map.get("params").and_then(Value::as_object).cloned().unwrap_or_else(Map::new);
            step.expected_outputs = map
                .get("expectedOutputs")
                .or_else(|| map.get("expected_outputs"))
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            Some(step)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentflow_core::{
        fetch_records,
        mocks::{FailingLlm, MockLlm},
        types::HistoryFilter,
    };
    use intentflow_store::InMemoryHistoryStore;

    fn ctx() -> RequestContext {
        RequestContext::new("plan-session", "u1")
    }

    #[test]
    fn test_parse_json_strings_and_objects() {
        let steps = parse_steps(r#"["Design schema", {"title": "Create table", "tool": "MIGRATE_SCHEMA", "params": {"migration": "001"}}]"#);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].title, "Design schema");
        assert_eq!(steps[1].tool, Some(IntentKind::MigrateSchema));
        assert_eq!(steps[1].params["migration"], "001");
    }

    #[test]
    fn test_parse_numbered_list() {
        let steps = parse_steps("Here you go:\n1. Research the topic\n2) Write the code\n- Test it\n");
        let titles: Vec<&str> = steps.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Research the topic", "Write the code", "Test it"]);
    }

    #[test]
    fn test_parse_wrapped_steps_object() {
        let steps = parse_steps(r#"```json
{"steps": [{"description": "Scan dependencies", "expectedOutputs": ["report"]}]}
```"#);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].expected_outputs, vec!["report"]);
    }

    #[tokio::test]
    async fn test_fine_plan_has_three_layers_and_chains_context() {
        let llm = Arc::new(
            MockLlm::constant("[]")
                .with_rule("business layer", r#"["Assess risk", "Ship fix"]"#)
                .with_rule("technical layer", r#"["Run scanner", "Patch deps", "Verify"]"#)
                .with_rule(
                    "execution layer",
                    r#"[{"title": "scan", "tool": "SECURITY_SCAN", "params": {"path": "."}}]"#,
                ),
        );
        let store = Arc::new(InMemoryHistoryStore::new());
        let planner = HierarchicalPlanner::new(llm.clone(), store.clone());
        let intent = Intent::new(IntentKind::SecurityScan).with_param("path", ".");

        let plan = planner.plan(&intent, &ctx(), Granularity::Fine).await.unwrap();
        assert_eq!(plan.resolved_granularity, Granularity::Fine);
        assert_eq!(plan.layers.business.as_ref().unwrap().len(), 2);
        assert_eq!(plan.layers.technical.as_ref().unwrap().len(), 3);
        assert_eq!(plan.summary.total_steps, 6);
        assert_eq!(plan.to_task_plan().steps[0].tool, Some(IntentKind::SecurityScan));

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1].contains("Assess risk"));
        assert!(prompts[2].contains("Patch deps"));

        let recs: Vec<HierarchicalPlan> =
            fetch_records(store.as_ref(), &HistoryFilter::new().session("plan-session")).await.unwrap();
        assert_eq!(recs.len(), 1);
    }

    #[tokio::test]
    async fn test_auto_granularity_follows_complexity() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let llm = Arc::new(MockLlm::constant(r#"["only step"]"#));
        let planner = HierarchicalPlanner::new(llm.clone(), store);

        let simple = Intent::new(IntentKind::ReadFile).with_param("filePath", "a.txt");
        let plan = planner.plan(&simple, &ctx(), Granularity::Auto).await.unwrap();
        assert_eq!(plan.granularity, Granularity::Auto);
        assert_eq!(plan.resolved_granularity, Granularity::Coarse);
        assert!(plan.layers.technical.is_none());
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_degrades_to_single_step() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let planner = HierarchicalPlanner::new(Arc::new(FailingLlm::default()), store);
        let intent = Intent::new(IntentKind::RefactorCode).with_param("path", "src");

        let plan = planner.plan(&intent, &ctx(), Granularity::Medium).await.unwrap();
        assert_eq!(plan.summary.total_steps, 2);
        let steps = plan.to_task_plan().steps;
        assert_eq!(steps.len(), 1);
        assert!(steps[0].title.contains("REFACTOR_CODE"));
    }

    #[tokio::test]
    async fn test_steps_capped_per_layer() {
        let many: Vec<String> = (0..30).map(|i| format!("step {}", i)).collect();
        let llm = Arc::new(MockLlm::constant(&serde_json::to_string(&many).unwrap()));
        let planner = HierarchicalPlanner::new(llm, Arc::new(InMemoryHistoryStore::new()))
            .with_config(PlannerConfig { max_steps_per_layer: 4 });
        let plan = planner
            .plan(&Intent::new(IntentKind::BuildProject), &ctx(), Granularity::Coarse)
            .await
            .unwrap();
        assert_eq!(plan.summary.total_steps, 4);
    }

    #[test]
    fn test_granularity_for_level() {
        assert_eq!(granularity_for(ComplexityLevel::Simple), Granularity::Coarse);
        assert_eq!(granularity_for(ComplexityLevel::Complex), Granularity::Fine);
    }
}
