//! Error types for IntentFlow.

use thiserror::Error;

/// Result type alias using IntentFlow's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for IntentFlow.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Gateway Errors (recognition & fusion)
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid intent: {0}")]
    InvalidIntent(String),

    #[error("Recognition failed: {0}")]
    Recognition(String),

    #[error("Fusion error: {0}")]
    Fusion(String),

    // =========================================================================
    // Model Gateway Errors (routing & distillation)
    // =========================================================================
    #[error("Model provider error: {0}")]
    ModelProvider(String),

    #[error("Distillation error: {0}")]
    Distillation(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    // =========================================================================
    // Controller Errors (planning, checkpoints, correction)
    // =========================================================================
    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Correction error: {0}")]
    Correction(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an invalid intent error.
    pub fn invalid_intent(msg: impl Into<String>) -> Self {
        Self::InvalidIntent(msg.into())
    }

    /// Create a model provider error.
    pub fn model_provider(msg: impl Into<String>) -> Self {
        Self::ModelProvider(msg.into())
    }

    /// Create a malformed response error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create a planning error.
    pub fn planning(msg: impl Into<String>) -> Self {
        Self::Planning(msg.into())
    }

    /// Create a tool execution error.
    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error came from a timeout or a cancellation rather than
    /// from the work itself.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Cancelled(_))
    }
}
