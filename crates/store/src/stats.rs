//! Typed statistics over the history store.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use intentflow_core::{
    fetch_records,
    types::{CorrectionAttempt, DistillationRecord, FusionRecord, HistoryFilter, ModelTier, RecordKind},
    Error, HistoryStore, Result,
};

/// Longest window accepted by [`correction_stats`].
pub const MAX_STATS_DAYS: u32 = 3650;

/// Aggregate fusion effectiveness.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FusionStats {
    pub total_fusions: usize,
    pub total_original_intents: usize,
    pub total_fused_intents: usize,
    pub average_reduction_rate: f64,
    pub total_llm_calls_saved: usize,
    /// Invocations per strategy; `none` counts calls where nothing merged.
    pub by_strategy: BTreeMap<String, usize>,
}

/// Aggregate routing behaviour.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DistillationStats {
    pub total_tasks: usize,
    /// Tasks planned for the small tier.
    pub small_model_planned: usize,
    /// Tasks whose final answer came from the small tier.
    pub small_model_served: usize,
    pub large_model_served: usize,
    pub fallback_count: usize,
    pub fallback_rate: f64,
    /// Share of tasks answered without touching the large tier.
    pub small_model_rate: f64,
    pub average_complexity: f64,
    pub by_level: BTreeMap<String, usize>,
}

/// Aggregate self-correction outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrectionStats {
    pub days: u32,
    pub total_runs: usize,
    pub successful_runs: usize,
    pub success_rate: f64,
    pub average_attempts: f64,
    pub total_corrections: usize,
    /// Runs that needed at least one correction and still succeeded.
    pub recovered_runs: usize,
    pub by_pattern: BTreeMap<String, usize>,
    pub by_strategy: BTreeMap<String, usize>,
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Fusion statistics for records matching `filter`.
pub async fn fusion_stats(store: &dyn HistoryStore, filter: &HistoryFilter) -> Result<FusionStats> {
    let records: Vec<FusionRecord> = fetch_records(store, filter).await?;
    let mut stats = FusionStats {
        total_fusions: records.len(),
        ..FusionStats::default()
    };
    for r in &records {
        stats.total_original_intents += r.original_count;
        stats.total_fused_intents += r.fused_count;
        stats.total_llm_calls_saved += r.llm_calls_saved;
        let key = r.strategy.map(|s| s.as_str()).unwrap_or("none");
        *stats.by_strategy.entry(key.to_string()).or_default() += 1;
    }
    stats.average_reduction_rate = store
        .average(RecordKind::Fusion, "reductionRate", filter)
        .await?
        .unwrap_or(0.0);
    Ok(stats)
}

/// Distillation statistics over all records.
pub async fn distillation_stats(store: &dyn HistoryStore) -> Result<DistillationStats> {
    let filter = HistoryFilter::new();
    let records: Vec<DistillationRecord> = fetch_records(store, &filter).await?;
    let total = records.len();
    let mut stats = DistillationStats {
        total_tasks: total,
        ..DistillationStats::default()
    };
    for r in &records {
        if r.planned_model == ModelTier::Small {
            stats.small_model_planned += 1;
        }
        match r.actual_model {
            ModelTier::Small => stats.small_model_served += 1,
            ModelTier::Large => stats.large_model_served += 1,
        }
        *stats.by_level.entry(r.complexity_level.to_string()).or_default() += 1;
    }
    stats.fallback_count = store.sum(RecordKind::Distillation, "usedFallback", &filter).await? as usize;
    stats.fallback_rate = ratio(stats.fallback_count, stats.small_model_planned);
    stats.small_model_rate = ratio(stats.small_model_served, total);
    stats.average_complexity = store
        .average(RecordKind::Distillation, "complexityScore", &filter)
        .await?
        .unwrap_or(0.0);
    Ok(stats)
}

/// Correction statistics over the last `days` days, at most [`MAX_STATS_DAYS`].
pub async fn correction_stats(store: &dyn HistoryStore, days: u32) -> Result<CorrectionStats> {
    if days > MAX_STATS_DAYS {
        return Err(Error::invalid_request(format!(
            "days must be at most {}, got {}",
            MAX_STATS_DAYS, days
        )));
    }
    let since = Utc::now()
        .checked_sub_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| Error::invalid_request(format!("days {} is out of range", days)))?;
    let filter = HistoryFilter::new().since(since);
    let records: Vec<CorrectionAttempt> = fetch_records(store, &filter).await?;
    let mut stats = CorrectionStats {
        days,
        total_runs: records.len(),
        ..CorrectionStats::default()
    };
    for r in &records {
        if r.final_success {
            stats.successful_runs += 1;
            if !r.corrections.is_empty() {
                stats.recovered_runs += 1;
            }
        }
        stats.total_corrections += r.corrections.len();
        for c in &r.corrections {
            *stats.by_pattern.entry(c.diagnosis.pattern.to_string()).or_default() += 1;
            *stats.by_strategy.entry(c.diagnosis.strategy.to_string()).or_default() += 1;
        }
    }
    stats.success_rate = ratio(stats.successful_runs, stats.total_runs);
    stats.average_attempts = store
        .average(RecordKind::Correction, "attempts", &filter)
        .await?
        .unwrap_or(0.0);
    Ok(stats)
}
