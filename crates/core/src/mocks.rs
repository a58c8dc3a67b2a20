//! Mock implementations of core traits for testing.
//!
//! Shared by the unit and integration tests of every crate in the workspace.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::{
    context::RequestContext,
    traits::{ChatMessage, IntentClassifier, LlmClient, LlmResponse, LlmUsage, ModelExecutor, StepExecutor},
    types::{Intent, ModelTier, PlanStep, Task},
    Error, Result,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Mock LLM Client
// =============================================================================

/// Scripted mock LLM.
///
/// Prompts containing a registered marker get that marker's response;
/// everything else cycles through the default response list.
pub struct MockLlm {
    responses: Vec<String>,
    rules: Vec<(String, String)>,
    call_count: Mutex<usize>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    /// Create a new mock LLM with a cycle of responses.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            rules: Vec::new(),
            call_count: Mutex::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the same response.
    pub fn constant(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// Answer prompts containing `marker` with `response`. First match wins.
    pub fn with_rule(mut self, marker: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((marker.into(), response.into()));
        self
    }

    /// Get the number of calls made to this mock.
    pub fn call_count(&self) -> usize {
        *lock(&self.call_count)
    }

    /// Every prompt received, in order.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    fn respond(&self, prompt: &str) -> String {
        lock(&self.prompts).push(prompt.to_string());
        if let Some((_, response)) = self.rules.iter().find(|(marker, _)| prompt.contains(marker.as_str())) {
            *lock(&self.call_count) += 1;
            return response.clone();
        }
        let mut count = lock(&self.call_count);
        let n = *count;
        *count += 1;
        if self.responses.is_empty() {
            return String::new();
        }
        self.responses[n % self.responses.len()].clone()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse> {
        let content = self.respond(prompt);
        Ok(LlmResponse {
            content,
            finish_reason: "stop".to_string(),
            usage: LlmUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            },
        })
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<LlmResponse> {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.complete(&prompt).await
    }
}

/// LLM that always fails.
pub struct FailingLlm {
    message: String,
    call_count: Mutex<usize>,
}

impl FailingLlm {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            call_count: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *lock(&self.call_count)
    }
}

impl Default for FailingLlm {
    fn default() -> Self {
        Self::new("provider unavailable")
    }
}

#[async_trait]
impl LlmClient for FailingLlm {
    async fn complete(&self, _prompt: &str) -> Result<LlmResponse> {
        *lock(&self.call_count) += 1;
        Err(Error::model_provider(self.message.clone()))
    }

    async fn chat(&self, _messages: &[ChatMessage]) -> Result<LlmResponse> {
        self.complete("").await
    }
}

/// LLM that sleeps before answering; used to exercise timeouts.
pub struct DelayedLlm {
    delay: Duration,
    response: String,
}

impl DelayedLlm {
    pub fn new(delay: Duration, response: impl Into<String>) -> Self {
        Self {
            delay,
            response: response.into(),
        }
    }
}

#[async_trait]
impl LlmClient for DelayedLlm {
    async fn complete(&self, _prompt: &str) -> Result<LlmResponse> {
        tokio::time::sleep(self.delay).await;
        Ok(LlmResponse::text(self.response.clone()))
    }

    async fn chat(&self, _messages: &[ChatMessage]) -> Result<LlmResponse> {
        self.complete("").await
    }
}

// =============================================================================
// Mock Classifier
// =============================================================================

/// Classifier returning a fixed intent.
pub struct StaticClassifier {
    intent: Intent,
}

impl StaticClassifier {
    pub fn new(intent: Intent) -> Self {
        Self { intent }
    }
}

#[async_trait]
impl IntentClassifier for StaticClassifier {
    async fn classify(&self, _text: &str, _ctx: &RequestContext) -> Result<Intent> {
        Ok(self.intent.clone())
    }
}

// =============================================================================
// Mock Executors
// =============================================================================

/// Scripted step outcome.
#[derive(Debug, Clone)]
pub enum StepScript {
    Ok(Value),
    Err(String),
    /// Sleep before succeeding with the value.
    Delay(Duration, Value),
}

/// Step executor driven by per-title outcome queues.
///
/// When a step's queue runs dry the last scripted outcome repeats; unscripted
/// steps succeed with `default`.
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<StepScript>>>,
    last: Mutex<HashMap<String, StepScript>>,
    default: Value,
    calls: Mutex<Vec<PlanStep>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            last: Mutex::new(HashMap::new()),
            default: serde_json::json!({"success": true}),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Value returned for unscripted steps.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = value;
        self
    }

    /// Queue outcomes for the step with this title.
    pub fn script(self, title: &str, outcomes: Vec<StepScript>) -> Self {
        lock(&self.scripts).insert(title.to_string(), outcomes.into_iter().collect());
        self
    }

    /// Every step executed, in order.
    pub fn calls(&self) -> Vec<PlanStep> {
        lock(&self.calls).clone()
    }

    /// Titles of executed steps, in order.
    pub fn call_titles(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|s| s.title.clone()).collect()
    }

    fn next(&self, title: &str) -> Option<StepScript> {
        let popped = lock(&self.scripts).get_mut(title).and_then(VecDeque::pop_front);
        match popped {
            Some(script) => {
                lock(&self.last).insert(title.to_string(), script.clone());
                Some(script)
            }
            None => lock(&self.last).get(title).cloned(),
        }
    }
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, step: &PlanStep, _ctx: &RequestContext) -> Result<Value> {
        lock(&self.calls).push(step.clone());
        match self.next(&step.title) {
            Some(StepScript::Ok(v)) => Ok(v),
            Some(StepScript::Err(msg)) => Err(Error::tool_execution(msg)),
            Some(StepScript::Delay(d, v)) => {
                tokio::time::sleep(d).await;
                Ok(v)
            }
            None => Ok(self.default.clone()),
        }
    }
}

/// Model executor with a fixed outcome per tier.
pub struct MockModelExecutor {
    small: std::result::Result<Value, String>,
    large: std::result::Result<Value, String>,
    calls: Mutex<Vec<ModelTier>>,
}

impl MockModelExecutor {
    pub fn new(small: Value, large: Value) -> Self {
        Self {
            small: Ok(small),
            large: Ok(large),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Small tier fails with `message`.
    pub fn failing_small(message: &str, large: Value) -> Self {
        Self {
            small: Err(message.to_string()),
            large: Ok(large),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Tiers invoked, in order.
    pub fn calls(&self) -> Vec<ModelTier> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ModelExecutor for MockModelExecutor {
    async fn execute(&self, _task: &Task, tier: ModelTier, _ctx: &RequestContext) -> Result<Value> {
        lock(&self.calls).push(tier);
        let outcome = match tier {
            ModelTier::Small => &self.small,
            ModelTier::Large => &self.large,
        };
        outcome.clone().map_err(Error::model_provider)
    }
}
