//! Model Gateway traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::Result;
use crate::types::{ModelTier, Task};

/// LLM client interface.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion.
    async fn complete(&self, prompt: &str) -> Result<LlmResponse>;

    /// Generate a chat completion.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LlmResponse>;
}

/// Chat message for LLM interactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role (system, user, assistant).
    pub role: String,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// Response from an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Generated content.
    pub content: String,
    /// Finish reason.
    pub finish_reason: String,
    /// Token usage.
    pub usage: LlmUsage,
}

impl LlmResponse {
    /// Response with a `stop` finish reason and no usage accounting.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: "stop".to_string(),
            usage: LlmUsage::default(),
        }
    }
}

/// Token usage from LLM call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Prompt tokens.
    pub prompt_tokens: u64,
    /// Completion tokens.
    pub completion_tokens: u64,
    /// Total tokens.
    pub total_tokens: u64,
}

/// Runs a task on a given model tier.
///
/// The result is a JSON object; the router inspects `confidence`,
/// `processed_intents`/`total_intents`, `error` and the expected output fields
/// to judge quality.
#[async_trait]
pub trait ModelExecutor: Send + Sync {
    async fn execute(&self, task: &Task, tier: ModelTier, ctx: &RequestContext) -> Result<Value>;
}
