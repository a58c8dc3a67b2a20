//! Complexity-based routing between model tiers.
//!
//! Simple tasks go to the small tier; anything harder goes straight to the
//! large tier. Small-tier results are quality-checked and escalated when they
//! fall short. Every execution leaves a [`DistillationRecord`] behind, and
//! [`DistillationRouter::learn_from_history`] uses those records to nudge the
//! feature weights of buckets that keep falling back.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use intentflow_core::{
    config::DistillationConfig,
    fetch_records, persist_unless_cancelled,
    traits::{HistoryStore, ModelExecutor},
    types::{
        ComplexityAssessment, ComplexityLevel, DistillationMeta, DistillationRecord, DistilledResult, FeatureWeights,
        HistoryFilter, ModelTier, QualityAssessment, Task,
    },
    Error, RequestContext, Result,
};
use intentflow_store::{distillation_stats, DistillationStats};

use crate::complexity::ComplexityAnalyzer;

/// Confidence assumed when a result does not report one.
const DEFAULT_CONFIDENCE: f64 = 0.7;
const LOW_CONFIDENCE: f64 = 0.6;

/// Immutable weight generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightSnapshot {
    /// Bumped each time learning changes the weights.
    pub version: u64,
    pub weights: FeatureWeights,
}

/// Per-bucket learning statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStat {
    pub features: Vec<String>,
    pub samples: usize,
    pub fallbacks: usize,
    pub fallback_rate: f64,
    /// Whether this bucket moved any weight.
    pub adjusted: bool,
}

/// Result of one learning pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningOutcome {
    pub records_examined: usize,
    pub buckets: Vec<BucketStat>,
    pub weights: WeightSnapshot,
    pub changed: bool,
}

/// Routes tasks between model tiers by complexity.
pub struct DistillationRouter {
    config: DistillationConfig,
    analyzer: ComplexityAnalyzer,
    executor: Arc<dyn ModelExecutor>,
    store: Arc<dyn HistoryStore>,
    weights: RwLock<Arc<WeightSnapshot>>,
}

impl DistillationRouter {
    pub fn new(config: DistillationConfig, executor: Arc<dyn ModelExecutor>, store: Arc<dyn HistoryStore>) -> Self {
        let snapshot = WeightSnapshot {
            version: 0,
            weights: config.weights,
        };
        Self {
            analyzer: ComplexityAnalyzer::from_config(&config),
            config,
            executor,
            store,
            weights: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Current weight snapshot.
    pub fn weights(&self) -> Arc<WeightSnapshot> {
        match self.weights.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Score a task under the current weights without executing it.
    pub fn assess(&self, task: &Task) -> ComplexityAssessment {
        self.analyzer.assess(task, &self.weights().weights)
    }

    /// Execute `task` on the tier its complexity calls for.
    pub async fn execute_with_distillation(&self, task: &Task, ctx: &RequestContext) -> Result<DistilledResult> {
        if task.is_empty() {
            return Err(Error::invalid_request("task has neither a description nor intents"));
        }
        if ctx.is_cancelled() {
            return Err(Error::Cancelled("request cancelled before routing".into()));
        }

        let complexity = self.assess(task);
        let (planned, reason) = if !self.config.enabled {
            (ModelTier::Large, "distillation_disabled".to_string())
        } else if complexity.level == ComplexityLevel::Simple {
            (ModelTier::Small, format!("complexity_{}", complexity.level))
        } else {
            (ModelTier::Large, format!("complexity_{}", complexity.level))
        };

        tracing::debug!(
            session_id = %ctx.session_id,
            task_id = %task.task_id,
            score = complexity.score,
            level = %complexity.level,
            tier = %planned,
            "Routing task"
        );

        let mut trail = Trail::new(planned, reason);
        let outcome = self.run(task, ctx, &mut trail).await;

        let record = DistillationRecord {
            task_id: task.task_id.clone(),
            complexity_level: complexity.level,
            complexity_score: complexity.score,
            features: complexity.features,
            planned_model: planned,
            actual_model: trail.actual,
            used_fallback: trail.used_fallback,
            quality_score: trail.quality.as_ref().map(|q| q.score),
            quality_issues: trail.quality.map(|q| q.issues).unwrap_or_default(),
            route_reason: trail.reason,
            session_id: ctx.session_id.clone(),
            user_id: ctx.user_id.clone(),
            created_at: Utc::now(),
        };
        intentflow_telemetry::track_route(
            complexity.level.as_str(),
            planned.as_str(),
            record.actual_model.as_str(),
            record.used_fallback,
            complexity.score,
        );
        persist_unless_cancelled(self.store.as_ref(), ctx, &record).await;

        let result = outcome?;
        Ok(DistilledResult {
            result,
            distillation: DistillationMeta {
                model_used: record.actual_model,
                complexity,
                used_fallback: record.used_fallback,
            },
        })
    }

    async fn run(&self, task: &Task, ctx: &RequestContext, trail: &mut Trail) -> Result<Value> {
        if trail.actual == ModelTier::Large {
            return self.large(task, ctx, trail).await;
        }

        let small = match self.executor.execute(task, ModelTier::Small, ctx).await {
            Err(e) if e.is_interruption() => return Err(e),
            other => other,
        };
        let quality = match &small {
            Ok(value) => assess_quality(value, task),
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "Small tier failed");
                QualityAssessment::failed("small_model_error")
            }
        };
        let below = quality.score < self.config.quality_threshold;
        let score = quality.score;
        trail.quality = Some(quality);

        if below && self.config.fallback_enabled {
            tracing::info!(
                session_id = %ctx.session_id,
                task_id = %task.task_id,
                quality = score,
                "Escalating to large tier"
            );
            trail.used_fallback = true;
            trail.reason.push_str("+quality_fallback");
            return self.large(task, ctx, trail).await;
        }

        if small.is_err() {
            trail.reason.push_str("+failed");
        }
        small
    }

    async fn large(&self, task: &Task, ctx: &RequestContext, trail: &mut Trail) -> Result<Value> {
        trail.actual = ModelTier::Large;
        let outcome = self.executor.execute(task, ModelTier::Large, ctx).await;
        if outcome.is_err() {
            trail.reason.push_str("+failed");
        }
        outcome
    }

    /// Re-derive weights from the base config and recent routing outcomes.
    ///
    /// Small-routed records are bucketed by their set of active features. A
    /// bucket with enough samples whose fallback rate exceeds the threshold
    /// raises the weight of each of its features by `learning_rate * rate`,
    /// capped at `max_weight`. Running twice over the same history yields the
    /// same weights.
    pub async fn learn_from_history(&self) -> Result<LearningOutcome> {
        let learning = &self.config.learning;
        let filter = HistoryFilter::new().limit(learning.window);
        let records: Vec<DistillationRecord> = fetch_records(self.store.as_ref(), &filter).await?;

        let mut buckets: BTreeMap<BTreeSet<&'static str>, (usize, usize)> = BTreeMap::new();
        for record in records.iter().filter(|r| r.planned_model == ModelTier::Small) {
            let key: BTreeSet<&'static str> = record
                .features
                .active(learning.active_feature_threshold)
                .into_iter()
                .collect();
            let entry = buckets.entry(key).or_default();
            entry.0 += 1;
            if record.used_fallback {
                entry.1 += 1;
            }
        }

        let mut weights = self.config.weights;
        let mut stats = Vec::with_capacity(buckets.len());
        for (features, (samples, fallbacks)) in buckets {
            let rate = fallbacks as f64 / samples as f64;
            let adjusted = !features.is_empty()
                && samples >= learning.min_samples
                && rate > learning.fallback_rate_threshold;
            if adjusted {
                for name in &features {
                    if let Some(w) = weights.get_mut(name) {
                        *w = (*w + learning.learning_rate * rate).min(learning.max_weight);
                    }
                }
            }
            stats.push(BucketStat {
                features: features.iter().map(|s| s.to_string()).collect(),
                samples,
                fallbacks,
                fallback_rate: rate,
                adjusted,
            });
        }

        let (snapshot, changed) = self.swap_weights(weights);
        tracing::info!(
            records = records.len(),
            buckets = stats.len(),
            version = snapshot.version,
            changed,
            "Distillation weights recomputed"
        );

        Ok(LearningOutcome {
            records_examined: records.len(),
            buckets: stats,
            weights: snapshot,
            changed,
        })
    }

    fn swap_weights(&self, weights: FeatureWeights) -> (WeightSnapshot, bool) {
        let mut guard = match self.weights.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.weights == weights {
            return ((**guard).clone(), false);
        }
        let next = WeightSnapshot {
            version: guard.version + 1,
            weights,
        };
        *guard = Arc::new(next.clone());
        (next, true)
    }

    /// Aggregate routing statistics over all recorded executions.
    pub async fn get_distillation_stats(&self) -> Result<DistillationStats> {
        distillation_stats(self.store.as_ref()).await
    }
}

/// Routing decisions accumulated during one execution.
struct Trail {
    actual: ModelTier,
    used_fallback: bool,
    quality: Option<QualityAssessment>,
    reason: String,
}

impl Trail {
    fn new(planned: ModelTier, reason: String) -> Self {
        Self {
            actual: planned,
            used_fallback: false,
            quality: None,
            reason,
        }
    }
}

/// `(0.5 * confidence + 0.5 * clean) * completeness`.
pub fn assess_quality(result: &Value, task: &Task) -> QualityAssessment {
    let is_empty = match result {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    };
    if is_empty {
        return QualityAssessment::failed("empty_result");
    }

    let mut issues = Vec::new();

    let confidence = result
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE);
    if confidence < LOW_CONFIDENCE {
        issues.push("low_confidence".to_string());
    }

    let mut completeness = 1.0;
    let requested = task.intents.len() as f64;
    let reported = result.get("total_intents").and_then(Value::as_f64).unwrap_or(0.0);
    let total = requested.max(reported);
    if let Some(processed) = processed_count(result) {
        if total > 0.0 && processed < total {
            completeness *= (processed / total).clamp(0.0, 1.0);
            issues.push("incomplete_processing".to_string());
        }
    }

    let expected: BTreeSet<&str> = task
        .intents
        .iter()
        .flat_map(|i| i.kind.schema().outputs.iter().copied())
        .collect();
    if !expected.is_empty() {
        let present = expected
            .iter()
            .filter(|k| result.get(**k).map_or(false, |v| !v.is_null()))
            .count();
        if present < expected.len() {
            completeness *= present as f64 / expected.len() as f64;
            issues.push("missing_output".to_string());
        }
    }

    let has_error = result.get("error").map_or(false, |e| !e.is_null() && e != &Value::Bool(false));
    let clean = if has_error {
        issues.push("contains_error".to_string());
        0.0
    } else {
        1.0
    };

    QualityAssessment {
        score: ((0.5 * confidence + 0.5 * clean) * completeness).clamp(0.0, 1.0),
        issues,
    }
}

/// Intents the result claims to cover: a `processedIntents` list or a count.
fn processed_count(result: &Value) -> Option<f64> {
    ["processedIntents", "processed_intents"]
        .iter()
        .filter_map(|key| result.get(*key))
        .find_map(|value| match value {
            Value::Array(items) => Some(items.len() as f64),
            other => other.as_f64(),
        })
}
