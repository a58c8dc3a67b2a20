//! Rig LLM client adapter.
//!
//! Wraps Rig's Agent for integration with our LlmClient trait.

use async_trait::async_trait;
use std::sync::Arc;

use intentflow_core::{
    config::{LlmConfig, ModelEndpoint},
    traits::{ChatMessage, LlmClient, LlmResponse, LlmUsage},
    Error, Result,
};

use rig::client::{CompletionClient, ProviderClient};
use rig::completion::Prompt;

use crate::providers::ModelTiers;

/// Provider type for Rig clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigProvider {
    OpenAI,
    Anthropic,
}

impl RigProvider {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(Error::config(format!("unsupported LLM provider '{}'", other))),
        }
    }

    fn key_var(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

/// Configuration for Rig client.
#[derive(Debug, Clone)]
pub struct RigConfig {
    pub provider: RigProvider,
    pub model: String,
    pub system_prompt: Option<String>,
}

impl RigConfig {
    pub fn openai(model: impl Into<String>) -> Self {
        Self {
            provider: RigProvider::OpenAI,
            model: model.into(),
            system_prompt: None,
        }
    }

    pub fn anthropic(model: impl Into<String>) -> Self {
        Self {
            provider: RigProvider::Anthropic,
            model: model.into(),
            system_prompt: None,
        }
    }

    pub fn from_endpoint(endpoint: &ModelEndpoint) -> Result<Self> {
        Ok(Self {
            provider: RigProvider::parse(&endpoint.provider)?,
            model: endpoint.model.clone(),
            system_prompt: None,
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Rig-based LLM client.
pub struct RigLlmClient {
    config: RigConfig,
}

impl RigLlmClient {
    pub fn new(config: RigConfig) -> Self {
        Self { config }
    }

    /// Flatten chat messages into a single prompt; system messages become the preamble.
    fn build_prompt(messages: &[ChatMessage]) -> (Option<String>, String) {
        let mut system = Vec::new();
        let mut prompt = String::new();

        for msg in messages {
            match msg.role.as_str() {
                "system" => system.push(msg.content.as_str()),
                "user" => prompt.push_str(&format!("User: {}\n\n", msg.content)),
                "assistant" => prompt.push_str(&format!("Assistant: {}\n\n", msg.content)),
                _ => prompt.push_str(&format!("{}: {}\n\n", msg.role, msg.content)),
            }
        }

        let system = (!system.is_empty()).then(|| system.join("\n\n"));
        (system, prompt)
    }

    async fn call(&self, preamble: Option<&str>, prompt: &str) -> Result<LlmResponse> {
        // from_env panics without a key
        if std::env::var(self.config.provider.key_var()).is_err() {
            return Err(Error::model_provider(format!("{} not set", self.config.provider.key_var())));
        }

        let preamble = preamble.or(self.config.system_prompt.as_deref());
        let response: String = match self.config.provider {
            RigProvider::OpenAI => {
                use rig::providers::openai;
                let client = openai::Client::from_env();
                let mut builder = client.agent(&self.config.model);
                if let Some(system) = preamble {
                    builder = builder.preamble(system);
                }
                builder
                    .build()
                    .prompt(prompt)
                    .await
                    .map_err(|e| Error::model_provider(format!("OpenAI error: {}", e)))?
            }
            RigProvider::Anthropic => {
                use rig::providers::anthropic;
                let client = anthropic::Client::from_env();
                let mut builder = client.agent(&self.config.model);
                if let Some(system) = preamble {
                    builder = builder.preamble(system);
                }
                builder
                    .build()
                    .prompt(prompt)
                    .await
                    .map_err(|e| Error::model_provider(format!("Anthropic error: {}", e)))?
            }
        };

        // Rig's prompt API does not surface usage; estimate at 4 chars per token.
        let prompt_tokens = (prompt.len() / 4) as u64;
        let completion_tokens = (response.len() / 4) as u64;
        Ok(LlmResponse {
            content: response,
            finish_reason: "stop".to_string(),
            usage: LlmUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        })
    }
}

#[async_trait]
impl LlmClient for RigLlmClient {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse> {
        tracing::debug!(
            provider = ?self.config.provider,
            model = %self.config.model,
            prompt_len = prompt.len(),
            "Calling LLM"
        );
        self.call(None, prompt).await
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<LlmResponse> {
        let (system, prompt) = Self::build_prompt(messages);
        tracing::debug!(
            provider = ?self.config.provider,
            model = %self.config.model,
            messages = messages.len(),
            "Calling LLM chat"
        );
        self.call(system.as_deref(), &prompt).await
    }
}

/// Build the small and large tiers from config.
pub fn tiers_from_config(config: &LlmConfig) -> Result<ModelTiers> {
    let small = RigLlmClient::new(RigConfig::from_endpoint(&config.small)?);
    let large = RigLlmClient::new(RigConfig::from_endpoint(&config.large)?);
    Ok(ModelTiers::new(Arc::new(small), Arc::new(large)))
}
