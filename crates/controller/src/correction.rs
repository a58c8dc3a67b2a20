//! Self-correcting plan execution.
//!
//! Steps run in order through a [`StepExecutor`]. A failed step ends the pass;
//! the loop diagnoses the failure, repairs the failed step, and resumes from
//! it on the next pass. Steps that already succeeded are never re-run.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use intentflow_core::{
    call::bounded,
    config::CorrectionConfig,
    json::{parse_json, truncate},
    persist_unless_cancelled,
    traits::{HistoryStore, LlmClient, StepExecutor},
    types::{
        CheckpointOptions, CorrectionAttempt, CorrectionOptions, CorrectionRecord, Diagnosis, ErrorPattern, IntentKind,
        PlanStep, RepairStrategy, TaskPlan,
    },
    Error, RequestContext, Result,
};

use crate::checkpoint::CheckpointValidator;
use crate::diagnosis::FailureDiagnoser;

/// How a pass ended.
enum PassOutcome {
    Completed,
    Failed { index: usize, error: String },
    Cancelled { index: usize },
}

/// Repair proposed by the LLM.
#[derive(Debug, Default, Deserialize)]
struct RepairProposal {
    #[serde(default)]
    params: Option<Map<String, Value>>,
    #[serde(default)]
    tool: Option<String>,
}

pub struct SelfCorrectionLoop {
    validator: Option<Arc<CheckpointValidator>>,
    llm: Option<Arc<dyn LlmClient>>,
    store: Arc<dyn HistoryStore>,
    config: CorrectionConfig,
    llm_timeout: Duration,
}

impl SelfCorrectionLoop {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            validator: None,
            llm: None,
            store,
            config: CorrectionConfig::default(),
            llm_timeout: Duration::from_secs(30),
        }
    }

    /// LLM used for diagnosis fallback and repair proposals.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Checkpoint every successful step.
    pub fn with_validator(mut self, validator: Arc<CheckpointValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_config(mut self, config: CorrectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Default options derived from config.
    pub fn default_options(&self) -> CorrectionOptions {
        CorrectionOptions {
            max_retries: self.config.max_retries,
        }
    }

    fn diagnoser(&self) -> FailureDiagnoser {
        let diagnoser = FailureDiagnoser::new().with_llm_timeout(self.llm_timeout);
        match (&self.llm, self.config.enable_llm_diagnosis) {
            (Some(llm), true) => diagnoser.with_llm(llm.clone()),
            _ => diagnoser,
        }
    }

    /// Run `plan`, retrying failed steps up to `options.max_retries` times.
    pub async fn execute_with_correction(
        &self,
        plan: &TaskPlan,
        executor: &dyn StepExecutor,
        options: &CorrectionOptions,
        ctx: &RequestContext,
    ) -> Result<CorrectionAttempt> {
        if plan.steps.is_empty() {
            return Err(Error::invalid_request("cannot execute a plan with no steps"));
        }

        let diagnoser = self.diagnoser();
        let max_attempts = options.max_retries.saturating_add(1);
        let mut working = plan.clone();
        let mut outputs: Vec<Option<Value>> = vec![None; plan.steps.len()];
        let mut corrections = Vec::new();
        let mut next = 0usize;
        let mut attempts = 0u32;
        let mut final_success = false;
        let mut cancelled = false;
        let mut last_error = None;

        loop {
            attempts += 1;
            tracing::debug!(session_id = %ctx.session_id, attempt = attempts, resume_at = next, "Correction pass");

            let (index, error) = match self.run_pass(&working, next, executor, &mut outputs, ctx).await {
                PassOutcome::Completed => {
                    final_success = true;
                    break;
                }
                PassOutcome::Cancelled { index } => {
                    cancelled = true;
                    last_error = Some(format!("cancelled at step {}", index));
                    break;
                }
                PassOutcome::Failed { index, error } => (index, error),
            };

            tracing::info!(
                session_id = %ctx.session_id,
                attempt = attempts,
                step_index = index,
                error = %truncate(&error, 200),
                "Plan step failed"
            );
            last_error = Some(error.clone());
            next = index;
            if attempts >= max_attempts {
                break;
            }

            let diagnosis = diagnoser.diagnose(&working.steps[index], &error, ctx).await;
            let changes = self.repair(&mut working, index, &diagnosis, &error, &outputs, ctx).await;
            if ctx.is_cancelled() {
                // The repair never ran; drop it.
                cancelled = true;
                break;
            }

            tracing::info!(
                session_id = %ctx.session_id,
                attempt = attempts,
                pattern = %diagnosis.pattern,
                strategy = %diagnosis.strategy,
                "Applied correction"
            );
            if diagnosis.strategy == RepairStrategy::SkipStep {
                next = index + 1;
            }
            corrections.push(CorrectionRecord {
                diagnosis,
                changes,
                failed_step_index: index,
            });
        }

        let total_steps = plan.steps.len();
        let success_count = outputs.iter().filter(|o| o.is_some()).count();
        let attempt = CorrectionAttempt {
            plan_description: plan.description.clone(),
            total_steps,
            success_count,
            failed_count: total_steps - success_count,
            attempts,
            corrections,
            final_success,
            cancelled,
            step_outputs: outputs.into_iter().map(|o| o.unwrap_or(Value::Null)).collect(),
            last_error: if final_success { None } else { last_error },
        };

        intentflow_telemetry::track_correction(attempt.final_success, attempt.attempts, attempt.cancelled);
        persist_unless_cancelled(self.store.as_ref(), ctx, &attempt).await;
        Ok(attempt)
    }

    /// Execute steps from `start` until one fails or the plan ends.
    async fn run_pass(
        &self,
        plan: &TaskPlan,
        start: usize,
        executor: &dyn StepExecutor,
        outputs: &mut [Option<Value>],
        ctx: &RequestContext,
    ) -> PassOutcome {
        let step_timeout = Duration::from_millis(self.config.step_timeout_ms);

        for index in start..plan.steps.len() {
            if ctx.is_cancelled() {
                return PassOutcome::Cancelled { index };
            }
            let step = &plan.steps[index];
            let label = format!("step '{}'", step.title);

            let output = match bounded(&label, step_timeout, &ctx.cancel, executor.execute(step, ctx)).await {
                Ok(output) => output,
                Err(Error::Cancelled(_)) => return PassOutcome::Cancelled { index },
                Err(e) => {
                    return PassOutcome::Failed {
                        index,
                        error: e.to_string(),
                    }
                }
            };

            if let Some(error) = self.checkpoint(index, &output, plan, ctx).await {
                return PassOutcome::Failed { index, error };
            }
            outputs[index] = Some(output);
        }
        PassOutcome::Completed
    }

    /// Failure message when the checkpoint rejects the step.
    async fn checkpoint(&self, index: usize, output: &Value, plan: &TaskPlan, ctx: &RequestContext) -> Option<String> {
        if !self.config.validate_steps {
            return None;
        }
        let validator = self.validator.as_ref()?;
        match validator
            .validate_checkpoint(index, output, plan, &CheckpointOptions::default(), ctx)
            .await
        {
            Ok(v) if v.passed => None,
            Ok(v) => Some(format!("checkpoint failed: {}", v.failure_summary())),
            Err(e) => Some(format!("checkpoint failed: {}", e)),
        }
    }

    /// Apply `diagnosis` to the failed step. Returns the edits made.
    async fn repair(
        &self,
        plan: &mut TaskPlan,
        index: usize,
        diagnosis: &Diagnosis,
        error: &str,
        outputs: &[Option<Value>],
        ctx: &RequestContext,
    ) -> Vec<String> {
        match diagnosis.strategy {
            RepairStrategy::RegenerateParams => {
                let proposal = self.propose(&plan.steps[index], diagnosis, error, ctx).await;
                let step = &mut plan.steps[index];
                match proposal.and_then(|p| p.params) {
                    Some(params) => {
                        step.params = params;
                        vec!["replaced params with LLM proposal".to_string()]
                    }
                    None => regenerate_params(step, diagnosis.pattern, error, &outputs[..index]),
                }
            }
            RepairStrategy::SubstituteTool => {
                let proposal = self.propose(&plan.steps[index], diagnosis, error, ctx).await;
                let step = &mut plan.steps[index];
                let previous = step.tool.as_ref().map(|t| t.to_string()).unwrap_or_else(|| "none".into());
                match proposal.and_then(|p| p.tool) {
                    Some(tool) => {
                        let tool = IntentKind::from_name(&tool);
                        let change = format!("substituted tool {} -> {}", previous, tool);
                        step.tool = Some(tool);
                        vec![change]
                    }
                    None => {
                        step.tool = None;
                        vec![format!("cleared tool {}", previous)]
                    }
                }
            }
            RepairStrategy::SkipStep => vec![format!("skipped step '{}'", plan.steps[index].title)],
            RepairStrategy::RetryAsIs => vec!["retry without changes".to_string()],
        }
    }

    async fn propose(
        &self,
        step: &PlanStep,
        diagnosis: &Diagnosis,
        error: &str,
        ctx: &RequestContext,
    ) -> Option<RepairProposal> {
        let llm = self.llm.as_ref()?;
        let prompt = format!(
            "A plan step failed and must be repaired ({}).\nStep: {}\nTool: {}\nParams: {}\nError: {}\nDiagnosis: {}\n\
             Respond with JSON only: {{\"params\": {{...}}, \"tool\": \"TOOL_NAME or null\"}}",
            diagnosis.strategy,
            step.title,
            step.tool.as_ref().map(|t| t.as_str()).unwrap_or("none"),
            Value::Object(step.params.clone()),
            truncate(error, 1000),
            diagnosis.reason
        );
        let reply: Result<RepairProposal> = async {
            let response = bounded("repair LLM", self.llm_timeout, &ctx.cancel, llm.complete(&prompt)).await?;
            parse_json(&response.content)
        }
        .await;
        match reply {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::debug!(session_id = %ctx.session_id, error = %e, "No LLM repair proposal");
                None
            }
        }
    }
}

/// Deterministic param repair: drop params an invalid-params error names,
/// then fill missing required inputs from earlier step outputs.
///
/// Other failures (a missing output, say) never remove inputs.
fn regenerate_params(
    step: &mut PlanStep,
    pattern: ErrorPattern,
    error: &str,
    earlier: &[Option<Value>],
) -> Vec<String> {
    let mut changes = Vec::new();

    if pattern == ErrorPattern::InvalidParams {
        let words: Vec<String> = error
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        let named: Vec<String> = step
            .params
            .keys()
            .filter(|k| words.contains(&k.to_lowercase()))
            .cloned()
            .collect();
        for key in named {
            step.params.remove(&key);
            changes.push(format!("removed param '{}'", key));
        }
    }

    let required = step.tool.as_ref().map(|t| t.schema().required).unwrap_or(&[]);
    for key in required {
        if step.params.contains_key(*key) {
            continue;
        }
        let found = earlier
            .iter()
            .rev()
            .flatten()
            .find_map(|output| output.get(*key).filter(|v| !v.is_null()).cloned());
        if let Some(value) = found {
            step.params.insert(key.to_string(), value);
            changes.push(format!("filled param '{}' from earlier output", key));
        }
    }

    if changes.is_empty() {
        changes.push("no parameter repair available; retrying".to_string());
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentflow_core::{
        fetch_records,
        mocks::{MockLlm, ScriptedExecutor, StepScript},
        types::{HistoryFilter, RecordKind},
    };
    use intentflow_store::InMemoryHistoryStore;
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::new("corr-session", "u1")
    }

    fn plan() -> TaskPlan {
        TaskPlan::new(
            "write and commit",
            vec![
                PlanStep::new("write").with_tool(IntentKind::WriteFile).with_param("filePath", "a.txt"),
                PlanStep::new("commit").with_tool(IntentKind::GitCommit).with_param("message", "init"),
            ],
        )
    }

    fn write_ok() -> StepScript {
        StepScript::Ok(json!({"filePath": "a.txt", "bytesWritten": 5}))
    }

    fn commit_ok() -> StepScript {
        StepScript::Ok(json!({"commitHash": "abc123"}))
    }

    fn validating_loop(store: Arc<InMemoryHistoryStore>) -> SelfCorrectionLoop {
        SelfCorrectionLoop::new(store.clone()).with_validator(Arc::new(CheckpointValidator::new(store)))
    }

    #[tokio::test]
    async fn test_clean_run_single_attempt() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let exec = ScriptedExecutor::new()
            .script("write", vec![write_ok()])
            .script("commit", vec![commit_ok()]);
        let out = validating_loop(store.clone())
            .execute_with_correction(&plan(), &exec, &CorrectionOptions::default(), &ctx())
            .await
            .unwrap();
        assert!(out.final_success);
        assert_eq!(out.attempts, 1);
        assert!(out.corrections.is_empty());
        assert_eq!(out.success_count, 2);
        assert_eq!(out.failed_count, 0);
        assert_eq!(out.step_outputs[1]["commitHash"], "abc123");

        let recs: Vec<CorrectionAttempt> =
            fetch_records(store.as_ref(), &HistoryFilter::new().session("corr-session")).await.unwrap();
        assert_eq!(recs.len(), 1);
    }

    #[tokio::test]
    async fn test_param_error_recovers_on_second_attempt() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let exec = ScriptedExecutor::new()
            .script(
                "write",
                vec![StepScript::Err("invalid parameter: content is missing".into()), write_ok()],
            )
            .script("commit", vec![commit_ok()]);
        let out = validating_loop(store)
            .execute_with_correction(&plan(), &exec, &CorrectionOptions::default(), &ctx())
            .await
            .unwrap();

        assert!(out.final_success);
        assert_eq!(out.attempts, 2);
        assert_eq!(out.corrections.len(), 1);
        assert_eq!(out.corrections[0].diagnosis.pattern, ErrorPattern::InvalidParams);
        assert_eq!(out.corrections[0].diagnosis.strategy, RepairStrategy::RegenerateParams);
        assert_eq!(exec.call_titles(), vec!["write", "write", "commit"]);
    }

    #[tokio::test]
    async fn test_resumes_at_failed_step() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let exec = ScriptedExecutor::new()
            .script("write", vec![write_ok()])
            .script("commit", vec![StepScript::Err("connection refused".into()), commit_ok()]);
        let out = validating_loop(store)
            .execute_with_correction(&plan(), &exec, &CorrectionOptions::default(), &ctx())
            .await
            .unwrap();
        assert!(out.final_success);
        assert_eq!(out.corrections[0].failed_step_index, 1);
        assert_eq!(out.corrections[0].diagnosis.strategy, RepairStrategy::RetryAsIs);
        assert_eq!(exec.call_titles(), vec!["write", "commit", "commit"]);
    }

    #[tokio::test]
    async fn test_exhausts_retries() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let exec = ScriptedExecutor::new().script("write", vec![StepScript::Err("connection reset".into())]);
        let out = validating_loop(store)
            .execute_with_correction(&plan(), &exec, &CorrectionOptions { max_retries: 2 }, &ctx())
            .await
            .unwrap();
        assert!(!out.final_success);
        assert_eq!(out.attempts, 3);
        assert_eq!(out.corrections.len(), 2);
        assert_eq!(out.success_count, 0);
        assert_eq!(out.failed_count, 2);
        assert!(out.last_error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_failed_checkpoint_triggers_correction() {
        let store = Arc::new(InMemoryHistoryStore::new());
        // First write lacks bytesWritten.
        let exec = ScriptedExecutor::new()
            .script("write", vec![StepScript::Ok(json!({"filePath": "a.txt"})), write_ok()])
            .script("commit", vec![commit_ok()]);
        let out = validating_loop(store)
            .execute_with_correction(&plan(), &exec, &CorrectionOptions::default(), &ctx())
            .await
            .unwrap();
        assert!(out.final_success);
        assert_eq!(out.attempts, 2);
        assert_eq!(out.corrections[0].diagnosis.pattern, ErrorPattern::ValidationFailed);
    }

    #[tokio::test]
    async fn test_permission_error_skips_step() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let exec = ScriptedExecutor::new()
            .script("write", vec![StepScript::Err("EACCES: permission denied".into())])
            .script("commit", vec![commit_ok()]);
        let out = validating_loop(store)
            .execute_with_correction(&plan(), &exec, &CorrectionOptions::default(), &ctx())
            .await
            .unwrap();
        assert!(out.final_success);
        assert_eq!(out.attempts, 2);
        assert_eq!(out.success_count, 1);
        assert_eq!(out.failed_count, 1);
        assert!(out.step_outputs[0].is_null());
        assert_eq!(exec.call_titles(), vec!["write", "commit"]);
    }

    #[tokio::test]
    async fn test_llm_proposal_replaces_params() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let llm = Arc::new(MockLlm::constant(r#"{"params": {"filePath": "b.txt", "content": "hi"}}"#));
        let exec = ScriptedExecutor::new()
            .script("write", vec![StepScript::Err("invalid argument: filePath".into()), write_ok()])
            .script("commit", vec![commit_ok()]);
        let out = validating_loop(store)
            .with_llm(llm)
            .execute_with_correction(&plan(), &exec, &CorrectionOptions::default(), &ctx())
            .await
            .unwrap();
        assert!(out.final_success);
        assert_eq!(exec.calls()[1].params["filePath"], "b.txt");
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_is_a_failure() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let exec = ScriptedExecutor::new().script(
            "write",
            vec![StepScript::Delay(Duration::from_secs(120), json!({"filePath": "a.txt", "bytesWritten": 1}))],
        );
        let looped = validating_loop(store).with_config(CorrectionConfig {
            step_timeout_ms: 1_000,
            ..CorrectionConfig::default()
        });
        let out = looped
            .execute_with_correction(&plan(), &exec, &CorrectionOptions { max_retries: 1 }, &ctx())
            .await
            .unwrap();
        assert!(!out.final_success);
        assert_eq!(out.attempts, 2);
        assert_eq!(out.corrections[0].diagnosis.pattern, ErrorPattern::Timeout);
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_without_retry() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let exec = ScriptedExecutor::new();
        let ctx = ctx();
        ctx.cancel.cancel();
        let out = validating_loop(store.clone())
            .execute_with_correction(&plan(), &exec, &CorrectionOptions::default(), &ctx)
            .await
            .unwrap();
        assert!(out.cancelled);
        assert!(!out.final_success);
        assert_eq!(out.attempts, 1);
        assert!(out.corrections.is_empty());
        assert!(exec.calls().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_step_records_nothing() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let exec = ScriptedExecutor::new().script(
            "write",
            vec![StepScript::Delay(Duration::from_secs(30), json!({"filePath": "a.txt", "bytesWritten": 1}))],
        );
        let ctx = ctx();
        let token = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let out = validating_loop(store.clone())
            .execute_with_correction(&plan(), &exec, &CorrectionOptions::default(), &ctx)
            .await
            .unwrap();
        assert!(out.cancelled);
        assert_eq!(out.attempts, 1);
        assert_eq!(store.count(RecordKind::Correction, &HistoryFilter::new()).await.unwrap(), 0);
        assert_eq!(store.count(RecordKind::Checkpoint, &HistoryFilter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_output_keeps_step_inputs() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let plan = TaskPlan::new(
            "write greeting",
            vec![PlanStep::new("write")
                .with_tool(IntentKind::WriteFile)
                .with_param("filePath", "a.txt")
                .with_param("content", "hello")],
        );
        let exec = ScriptedExecutor::new().script(
            "write",
            vec![StepScript::Ok(json!({"bytesWritten": 5})), write_ok()],
        );
        let out = validating_loop(store)
            .execute_with_correction(&plan, &exec, &CorrectionOptions::default(), &ctx())
            .await
            .unwrap();

        assert!(out.final_success);
        assert_eq!(out.corrections[0].diagnosis.pattern, ErrorPattern::ValidationFailed);
        assert!(out.corrections[0].changes.iter().all(|c| !c.starts_with("removed")));
        let retried = &exec.calls()[1].params;
        assert_eq!(retried["filePath"], "a.txt");
        assert_eq!(retried["content"], "hello");
    }

    #[tokio::test]
    async fn test_empty_plan_rejected() {
        let lp = SelfCorrectionLoop::new(Arc::new(InMemoryHistoryStore::new()));
        let err = lp
            .execute_with_correction(
                &TaskPlan::new("nothing", vec![]),
                &ScriptedExecutor::new(),
                &CorrectionOptions::default(),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_regenerate_params_fills_from_earlier_outputs() {
        let mut step = PlanStep::new("report")
            .with_tool(IntentKind::GenerateReport)
            .with_param("format", "pdf");
        let earlier = vec![Some(json!({"exportPath": "/tmp/out.csv"}))];
        let changes = regenerate_params(
            &mut step,
            ErrorPattern::InvalidParams,
            "invalid param: format must be html",
            &earlier,
        );
        assert!(!step.params.contains_key("format"));
        assert_eq!(step.params["exportPath"], "/tmp/out.csv");
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_regenerate_params_matches_whole_names_only() {
        let mut step = PlanStep::new("write")
            .with_tool(IntentKind::WriteFile)
            .with_param("filePath", "a.txt")
            .with_param("content", "x");
        let changes = regenerate_params(&mut step, ErrorPattern::InvalidParams, "invalid param: contents", &[]);
        assert!(step.params.contains_key("content"));
        assert_eq!(changes, vec!["no parameter repair available; retrying"]);

        regenerate_params(&mut step, ErrorPattern::ValidationFailed, "missing expected output 'filePath'", &[]);
        assert!(step.params.contains_key("filePath"));
    }
}
