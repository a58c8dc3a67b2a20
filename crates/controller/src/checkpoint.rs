//! Post-step checkpoint validation.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use intentflow_core::{
    call::bounded,
    config::CheckpointConfig,
    json::{parse_json, truncate},
    persist_unless_cancelled,
    traits::{HistoryStore, LlmClient},
    types::{CheckKind, CheckpointOptions, CheckpointValidation, PlanStep, TaskPlan, ValidationItem},
    Error, RequestContext, Result,
};

#[derive(Debug, Deserialize)]
struct QualityReply {
    score: f64,
    #[serde(default)]
    issues: Vec<String>,
}

/// Validates step results before the next step runs.
pub struct CheckpointValidator {
    llm: Option<Arc<dyn LlmClient>>,
    store: Arc<dyn HistoryStore>,
    config: CheckpointConfig,
    llm_timeout: Duration,
}

impl CheckpointValidator {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            llm: None,
            store,
            config: CheckpointConfig::default(),
            llm_timeout: Duration::from_secs(30),
        }
    }

    /// Enable the LLM quality check.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_config(mut self, config: CheckpointConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Check the result of `plan.steps[step_index]`.
    pub async fn validate_checkpoint(
        &self,
        step_index: usize,
        step_result: &Value,
        plan: &TaskPlan,
        options: &CheckpointOptions,
        ctx: &RequestContext,
    ) -> Result<CheckpointValidation> {
        let step = plan.steps.get(step_index).ok_or_else(|| {
            Error::invalid_request(format!(
                "step index {} out of range for plan with {} steps",
                step_index,
                plan.steps.len()
            ))
        })?;

        let mut items = vec![check_existence(step_result)];
        items.extend(check_outputs(step, step_result));

        if !options.skip_llm_check && self.config.enable_llm_check {
            if let Some(llm) = &self.llm {
                let threshold = options.quality_threshold.unwrap_or(self.config.quality_threshold);
                if let Some(item) = self.check_quality(llm.as_ref(), step, step_result, threshold, ctx).await {
                    items.push(item);
                }
            }
        }

        let validation = CheckpointValidation::from_items(step_index, step.title.clone(), items);
        tracing::debug!(
            session_id = %ctx.session_id,
            step_index,
            passed = validation.passed,
            failed = validation.failed_count,
            recommendation = validation.recommendation.as_str(),
            "Checkpoint validated"
        );
        intentflow_telemetry::track_checkpoint(validation.recommendation.as_str());
        persist_unless_cancelled(self.store.as_ref(), ctx, &validation).await;

        Ok(validation)
    }

    /// `None` when the LLM could not give a verdict.
    async fn check_quality(
        &self,
        llm: &dyn LlmClient,
        step: &PlanStep,
        result: &Value,
        threshold: f64,
        ctx: &RequestContext,
    ) -> Option<ValidationItem> {
        let prompt = format!(
            "Rate how well this result accomplishes the step.\nStep: {}\nResult: {}\n\
             Respond with JSON only: {{\"score\": 0.0-1.0, \"issues\": [\"...\"]}}",
            step.title,
            truncate(&result.to_string(), 2000)
        );
        let reply: Result<QualityReply> = async {
            let response = bounded("checkpoint LLM", self.llm_timeout, &ctx.cancel, llm.complete(&prompt)).await?;
            parse_json(&response.content)
        }
        .await;

        match reply {
            Ok(reply) => {
                let score = reply.score.clamp(0.0, 1.0);
                let item = if score >= threshold {
                    ValidationItem::pass(CheckKind::LlmQuality, format!("quality {:.2}", score))
                } else {
                    let detail = if reply.issues.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", reply.issues.join(", "))
                    };
                    ValidationItem::fail(
                        CheckKind::LlmQuality,
                        false,
                        format!("quality {:.2} below {:.2}{}", score, threshold, detail),
                    )
                };
                Some(item.with_score(score))
            }
            Err(e) => {
                tracing::debug!(session_id = %ctx.session_id, error = %e, "Skipping LLM quality check");
                None
            }
        }
    }
}

/// Critical: the result carries a truthy success indicator.
///
/// An explicit `success` field decides on its own. Otherwise an object needs
/// no `error` and at least one truthy member.
fn check_existence(result: &Value) -> ValidationItem {
    let failure = match result {
        Value::Null => Some("step returned no result"),
        Value::Object(map) if map.is_empty() => Some("step returned an empty object"),
        Value::Object(map) => match map.get("success") {
            Some(flag) if !truthy(flag) => Some("step reported success=false"),
            Some(_) => None,
            None if map.get("error").map_or(false, truthy) => Some("step reported an error"),
            None if !map.values().any(truthy) => Some("step returned no truthy field"),
            None => None,
        },
        other if !truthy(other) => Some("step returned a falsy result"),
        _ => None,
    };
    match failure {
        Some(message) => ValidationItem::fail(CheckKind::Existence, true, message),
        None => ValidationItem::pass(CheckKind::Existence, "result present"),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// One non-critical check per expected output field.
fn check_outputs(step: &PlanStep, result: &Value) -> Vec<ValidationItem> {
    step.required_outputs()
        .into_iter()
        .map(|field| {
            let present = result.get(&field).map_or(false, |v| !v.is_null());
            let item = if present {
                ValidationItem::pass(CheckKind::ExpectedOutput, format!("output '{}' present", field))
            } else {
                ValidationItem::fail(
                    CheckKind::ExpectedOutput,
                    false,
                    format!("missing expected output '{}'", field),
                )
            };
            item.with_field(field)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentflow_core::{
        fetch_records,
        mocks::{FailingLlm, MockLlm},
        types::{HistoryFilter, IntentKind, Recommendation},
    };
    use intentflow_store::InMemoryHistoryStore;
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::new("cp-session", "u1")
    }

    fn plan() -> TaskPlan {
        TaskPlan::new(
            "commit work",
            vec![
                PlanStep::new("stage").with_tool(IntentKind::GitAdd),
                PlanStep::new("commit").with_tool(IntentKind::GitCommit),
                PlanStep::new("report").with_expected_outputs(&["summary", "url"]),
            ],
        )
    }

    #[tokio::test]
    async fn test_passing_step_continues() {
        let v = CheckpointValidator::new(Arc::new(InMemoryHistoryStore::new()));
        let out = v
            .validate_checkpoint(1, &json!({"commitHash": "abc"}), &plan(), &CheckpointOptions::default(), &ctx())
            .await
            .unwrap();
        assert!(out.passed);
        assert_eq!(out.failed_count, 0);
        assert_eq!(out.recommendation, Recommendation::Continue);
    }

    #[tokio::test]
    async fn test_missing_documented_field_fails() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let v = CheckpointValidator::new(store.clone());
        let out = v
            .validate_checkpoint(1, &json!({"success": true}), &plan(), &CheckpointOptions::default(), &ctx())
            .await
            .unwrap();
        assert!(!out.passed);
        assert!(out.failed_count >= 1);
        assert_eq!(out.critical_failures, 0);
        assert_eq!(out.recommendation, Recommendation::Retry);

        let recs: Vec<CheckpointValidation> =
            fetch_records(store.as_ref(), &HistoryFilter::new().session("cp-session")).await.unwrap();
        assert_eq!(recs.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_result_aborts() {
        let v = CheckpointValidator::new(Arc::new(InMemoryHistoryStore::new()));
        for result in [
            json!({}),
            json!(null),
            json!(0),
            json!({"success": false, "staged": true}),
            json!({"success": 0, "staged": true}),
            json!({"success": "", "staged": true}),
            json!({"staged": false, "note": ""}),
            json!({"error": "disk full", "staged": true}),
        ] {
            let out = v
                .validate_checkpoint(0, &result, &plan(), &CheckpointOptions::skip_llm(), &ctx())
                .await
                .unwrap();
            assert_eq!(out.recommendation, Recommendation::Abort, "result {}", result);
            assert!(out.critical_failures >= 1);
        }
    }

    #[tokio::test]
    async fn test_declared_outputs_each_checked() {
        let v = CheckpointValidator::new(Arc::new(InMemoryHistoryStore::new()));
        let out = v
            .validate_checkpoint(2, &json!({"summary": "ok"}), &plan(), &CheckpointOptions::default(), &ctx())
            .await
            .unwrap();
        assert_eq!(out.validations.len(), 3);
        assert_eq!(out.failed_count, 1);
        assert!(out.failure_summary().contains("url"));
    }

    #[tokio::test]
    async fn test_out_of_range_index_rejected() {
        let v = CheckpointValidator::new(Arc::new(InMemoryHistoryStore::new()));
        let err = v
            .validate_checkpoint(9, &json!({"x": 1}), &plan(), &CheckpointOptions::default(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_llm_quality_check() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let low = Arc::new(MockLlm::constant(r#"{"score": 0.4, "issues": ["vague"]}"#));
        let v = CheckpointValidator::new(store.clone()).with_llm(low.clone());
        let result = json!({"commitHash": "abc"});

        let out = v
            .validate_checkpoint(1, &result, &plan(), &CheckpointOptions::default(), &ctx())
            .await
            .unwrap();
        assert_eq!(out.recommendation, Recommendation::Retry);
        assert!(out.failure_summary().contains("vague"));

        let out = v
            .validate_checkpoint(1, &result, &plan(), &CheckpointOptions::skip_llm(), &ctx())
            .await
            .unwrap();
        assert!(out.passed);
        assert_eq!(low.call_count(), 1);

        let lenient = CheckpointOptions {
            skip_llm_check: false,
            quality_threshold: Some(0.3),
        };
        let out = v.validate_checkpoint(1, &result, &plan(), &lenient, &ctx()).await.unwrap();
        assert!(out.passed);
    }

    #[tokio::test]
    async fn test_llm_failure_skips_quality_check() {
        let v = CheckpointValidator::new(Arc::new(InMemoryHistoryStore::new())).with_llm(Arc::new(FailingLlm::default()));
        let out = v
            .validate_checkpoint(1, &json!({"commitHash": "abc"}), &plan(), &CheckpointOptions::default(), &ctx())
            .await
            .unwrap();
        assert!(out.passed);
        assert_eq!(out.validations.len(), 2);
    }
}
