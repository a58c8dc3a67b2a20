//! Failure diagnosis for the self-correction loop.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use intentflow_core::{
    call::bounded,
    json::{parse_json, truncate},
    traits::LlmClient,
    types::{Diagnosis, ErrorPattern, PlanStep, RepairStrategy},
    RequestContext, Result,
};

/// Message fragments per pattern, checked in this order.
const RULES: &[(ErrorPattern, &[&str])] = &[
    (
        ErrorPattern::Timeout,
        &["timeout", "timed out", "deadline exceeded", "time limit exceeded"],
    ),
    (
        ErrorPattern::PermissionDenied,
        &["permission denied", "access denied", "forbidden", "unauthorized", "eacces", "not permitted"],
    ),
    (
        ErrorPattern::ValidationFailed,
        &["checkpoint failed", "validation failed", "missing expected output"],
    ),
    (
        ErrorPattern::InvalidParams,
        &[
            "invalid param",
            "invalid argument",
            "invalid value",
            "missing required",
            "missing param",
            "bad request",
            "malformed",
            "must be",
        ],
    ),
    (
        ErrorPattern::MissingDependency,
        &[
            "not found",
            "no such file",
            "enoent",
            "does not exist",
            "missing dependency",
            "unknown tool",
            "not installed",
        ],
    ),
    (
        ErrorPattern::ExternalError,
        &[
            "connection",
            "network",
            "econnrefused",
            "econnreset",
            "rate limit",
            "quota",
            "unavailable",
            "service error",
            "upstream",
            "provider",
        ],
    ),
];

/// Default repair for a failure class.
pub fn strategy_for(pattern: ErrorPattern) -> RepairStrategy {
    match pattern {
        ErrorPattern::InvalidParams | ErrorPattern::ValidationFailed => RepairStrategy::RegenerateParams,
        ErrorPattern::MissingDependency => RepairStrategy::SubstituteTool,
        ErrorPattern::PermissionDenied => RepairStrategy::SkipStep,
        ErrorPattern::ExternalError | ErrorPattern::Timeout | ErrorPattern::Unknown => RepairStrategy::RetryAsIs,
    }
}

/// Classify by message fragments.
pub fn diagnose_by_rules(message: &str) -> Option<Diagnosis> {
    let lower = message.to_lowercase();
    RULES.iter().find_map(|(pattern, fragments)| {
        fragments.iter().find(|f| lower.contains(*f)).map(|fragment| Diagnosis {
            pattern: *pattern,
            reason: format!("matched '{}'", fragment),
            strategy: strategy_for(*pattern),
        })
    })
}

#[derive(Debug, Deserialize)]
struct DiagnosisReply {
    pattern: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    strategy: Option<String>,
}

/// Rules first, then the LLM, then `unknown`.
pub struct FailureDiagnoser {
    llm: Option<Arc<dyn LlmClient>>,
    llm_timeout: Duration,
}

impl FailureDiagnoser {
    pub fn new() -> Self {
        Self {
            llm: None,
            llm_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    pub async fn diagnose(&self, step: &PlanStep, error: &str, ctx: &RequestContext) -> Diagnosis {
        if let Some(diagnosis) = diagnose_by_rules(error) {
            return diagnosis;
        }

        if let Some(llm) = &self.llm {
            match self.ask_llm(llm.as_ref(), step, error, ctx).await {
                Ok(diagnosis) => return diagnosis,
                Err(e) => {
                    tracing::debug!(session_id = %ctx.session_id, error = %e, "LLM diagnosis unavailable");
                }
            }
        }

        Diagnosis {
            pattern: ErrorPattern::Unknown,
            reason: format!("unclassified failure: {}", truncate(error, 200)),
            strategy: RepairStrategy::RetryAsIs,
        }
    }

    async fn ask_llm(&self, llm: &dyn LlmClient, step: &PlanStep, error: &str, ctx: &RequestContext) -> Result<Diagnosis> {
        let prompt = format!(
            "A plan step failed. Classify the failure.\nStep: {}\nTool: {}\nParams: {}\nError: {}\n\
             Patterns: invalid_params, missing_dependency, permission_denied, external_error, timeout, validation_failed, unknown.\n\
             Strategies: regenerate_params, substitute_tool, skip_step, retry_as_is.\n\
             Respond with JSON only: {{\"pattern\": \"...\", \"reason\": \"...\", \"strategy\": \"...\"}}",
            step.title,
            step.tool.as_ref().map(|t| t.as_str()).unwrap_or("none"),
            serde_json::Value::Object(step.params.clone()),
            truncate(error, 1000)
        );
        let response = bounded("diagnosis LLM", self.llm_timeout, &ctx.cancel, llm.complete(&prompt)).await?;
        let reply: DiagnosisReply = parse_json(&response.content)?;
        let pattern = ErrorPattern::parse(&reply.pattern);
        let strategy = reply
            .strategy
            .as_deref()
            .and_then(RepairStrategy::parse)
            .unwrap_or_else(|| strategy_for(pattern));
        Ok(Diagnosis {
            pattern,
            reason: if reply.reason.is_empty() {
                "classified by LLM".to_string()
            } else {
                reply.reason
            },
            strategy,
        })
    }
}

impl Default for FailureDiagnoser {
    fn default() -> Self {
        Self::new()
    }
}
