//! LLM-backed model tiers.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use intentflow_core::{
    call::bounded,
    json::extract_json_block,
    traits::{ChatMessage, LlmClient, ModelExecutor, StepExecutor},
    types::{ModelTier, PlanStep, Task},
    Error, RequestContext, Result,
};

const EXECUTOR_SYSTEM_PROMPT: &str = "You carry out user tasks and report the outcome as a single JSON object. \
Include every requested output field, a \"confidence\" between 0 and 1, \
\"processed_intents\" and \"total_intents\" counts, and an \"error\" field only if something failed.";

/// One client per tier.
#[derive(Clone)]
pub struct ModelTiers {
    pub small: Arc<dyn LlmClient>,
    pub large: Arc<dyn LlmClient>,
}

impl ModelTiers {
    pub fn new(small: Arc<dyn LlmClient>, large: Arc<dyn LlmClient>) -> Self {
        Self { small, large }
    }

    /// Both tiers served by the same client.
    pub fn uniform(client: Arc<dyn LlmClient>) -> Self {
        Self {
            small: client.clone(),
            large: client,
        }
    }

    pub fn get(&self, tier: ModelTier) -> &Arc<dyn LlmClient> {
        match tier {
            ModelTier::Small => &self.small,
            ModelTier::Large => &self.large,
        }
    }
}

/// [`ModelExecutor`] that prompts the tier's LLM and parses a JSON result.
pub struct LlmModelExecutor {
    tiers: ModelTiers,
    timeout: Duration,
}

impl LlmModelExecutor {
    pub fn new(tiers: ModelTiers) -> Self {
        Self {
            tiers,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_messages(task: &Task) -> Vec<ChatMessage> {
        let outputs: BTreeSet<&str> = task
            .intents
            .iter()
            .flat_map(|i| i.kind.schema().outputs.iter().copied())
            .collect();

        let mut user = format!("Task: {}\n", task.description);
        if !task.intents.is_empty() {
            let intents = serde_json::to_string(&task.intents).unwrap_or_default();
            user.push_str(&format!("Intents: {}\n", intents));
        }
        if let Some(context) = &task.context {
            user.push_str(&format!("Context:\n{}\n", context));
        }
        if !outputs.is_empty() {
            let fields: Vec<&str> = outputs.into_iter().collect();
            user.push_str(&format!("Required output fields: {}\n", fields.join(", ")));
        }
        user.push_str(&format!("total_intents: {}", task.intents.len().max(1)));

        vec![ChatMessage::system(EXECUTOR_SYSTEM_PROMPT), ChatMessage::user(user)]
    }
}

#[async_trait]
impl ModelExecutor for LlmModelExecutor {
    async fn execute(&self, task: &Task, tier: ModelTier, ctx: &RequestContext) -> Result<Value> {
        let client = self.tiers.get(tier);
        let messages = Self::build_messages(task);

        tracing::debug!(
            session_id = %ctx.session_id,
            task_id = %task.task_id,
            tier = %tier,
            "Executing task on model tier"
        );

        let response = bounded("model execution", self.timeout, &ctx.cancel, client.chat(&messages)).await?;
        intentflow_telemetry::track_tokens(
            tier.as_str(),
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
        );

        Ok(interpret(&response.content))
    }
}

const STEP_SYSTEM_PROMPT: &str = "You execute one step of a plan and report the outcome as a single JSON object. \
Include every requested output field and \"success\": true. If the step cannot be done, \
respond with {\"success\": false, \"error\": \"<reason>\"}.";

/// [`StepExecutor`] that asks an LLM to carry out each plan step.
pub struct LlmStepExecutor {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl LlmStepExecutor {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_messages(step: &PlanStep) -> Vec<ChatMessage> {
        let mut user = format!("Step: {}\n", step.title);
        if let Some(tool) = &step.tool {
            user.push_str(&format!("Tool: {}\n", tool));
        }
        if !step.params.is_empty() {
            user.push_str(&format!("Params: {}\n", Value::Object(step.params.clone())));
        }
        let outputs = step.required_outputs();
        if !outputs.is_empty() {
            user.push_str(&format!("Required output fields: {}\n", outputs.join(", ")));
        }
        vec![ChatMessage::system(STEP_SYSTEM_PROMPT), ChatMessage::user(user)]
    }
}

#[async_trait]
impl StepExecutor for LlmStepExecutor {
    async fn execute(&self, step: &PlanStep, ctx: &RequestContext) -> Result<Value> {
        let messages = Self::build_messages(step);
        let response = bounded("step execution", self.timeout, &ctx.cancel, self.client.chat(&messages)).await?;
        intentflow_telemetry::track_tokens(
            "step",
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
        );

        let result = interpret(&response.content);
        if let Some(error) = result.get("error").and_then(Value::as_str) {
            return Err(Error::tool_execution(error.to_string()));
        }
        Ok(result)
    }
}

/// JSON objects pass through; anything else is wrapped as `{"output": text}`.
fn interpret(content: &str) -> Value {
    extract_json_block(content)
        .and_then(|block| serde_json::from_str::<Value>(block).ok())
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({ "output": content.trim() }))
}
