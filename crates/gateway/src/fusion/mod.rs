//! Intent fusion.
//!
//! Merges adjacent, related intents into compound intents so downstream
//! stages make fewer model and tool calls. Rules run first; the LLM is only
//! consulted for adjacent pairs no rule touched.

pub mod rules;

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use intentflow_core::{
    call::bounded,
    config::FusionConfig,
    json::parse_json,
    persist_unless_cancelled,
    traits::{HistoryStore, LlmClient},
    types::{describe_intent, validate_intents, FusionRecord, FusionStrategy, Intent, IntentKind},
    RequestContext, Result,
};

use rules::{apply_rules, PositionIndex, Unit};

const LLM_FUSION_PROMPT: &str = "Two consecutive user intents follow. Decide whether they can be executed as ONE combined action without changing the outcome.
Respond with JSON only:
{\"shouldFuse\": bool, \"confidence\": 0.0-1.0, \"fusedIntent\": {\"type\": \"SCREAMING_SNAKE_KIND\", \"params\": {}}}";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FusionReply {
    #[serde(default)]
    should_fuse: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    fused_intent: Option<FusedIntentReply>,
}

#[derive(Debug, Deserialize)]
struct FusedIntentReply {
    #[serde(rename = "type")]
    kind: IntentKind,
    #[serde(default)]
    params: Map<String, Value>,
}

/// Intent fusion engine.
pub struct IntentFusion {
    config: FusionConfig,
    llm: Option<Arc<dyn LlmClient>>,
    store: Arc<dyn HistoryStore>,
    llm_timeout: Duration,
}

impl IntentFusion {
    pub fn new(config: FusionConfig, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            config,
            llm: None,
            store,
            llm_timeout: Duration::from_secs(30),
        }
    }

    /// Enable the LLM-assisted phase.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Fuse `intents`, returning a list no longer than the input.
    ///
    /// When nothing merges the input is returned verbatim. Otherwise the output
    /// is renumbered 1..n with dependencies remapped onto the fused groups.
    pub async fn fuse_intents(&self, intents: &[Intent], ctx: &RequestContext) -> Result<Vec<Intent>> {
        if intents.is_empty() {
            return Ok(Vec::new());
        }
        validate_intents(intents)?;

        let (fused, strategy) = if intents.len() == 1 {
            (intents.to_vec(), None)
        } else {
            self.run_phases(intents, ctx).await
        };

        let record = FusionRecord::new(ctx, intents, &fused, strategy);
        tracing::info!(
            session_id = %ctx.session_id,
            original = record.original_count,
            fused = record.fused_count,
            strategy = strategy.map(|s| s.as_str()).unwrap_or("none"),
            "Intent fusion complete"
        );
        intentflow_telemetry::track_fusion(
            strategy.map(|s| s.as_str()).unwrap_or("none"),
            record.original_count,
            record.fused_count,
        );
        persist_unless_cancelled(self.store.as_ref(), ctx, &record).await;

        Ok(fused)
    }

    async fn run_phases(&self, intents: &[Intent], ctx: &RequestContext) -> (Vec<Intent>, Option<FusionStrategy>) {
        let mut units: Vec<Unit> = if self.config.enable_rule_based {
            apply_rules(intents, self.config.max_fusion_window.max(1))
        } else {
            intents
                .iter()
                .enumerate()
                .map(|(i, it)| Unit::single(it.clone(), i))
                .collect()
        };
        let rule_merged = units.iter().any(Unit::is_merged);

        let mut llm_merged = false;
        if self.config.enable_llm_fusion {
            if let Some(llm) = &self.llm {
                let (next, merged) = self.llm_phase(llm.as_ref(), intents, units, ctx).await;
                units = next;
                llm_merged = merged;
            }
        }

        let strategy = match (rule_merged, llm_merged) {
            (true, true) => Some(FusionStrategy::Hybrid),
            (true, false) => Some(FusionStrategy::Rule),
            (false, true) => Some(FusionStrategy::Llm),
            (false, false) => None,
        };
        if strategy.is_none() {
            return (intents.to_vec(), None);
        }
        (renumber(intents, units), strategy)
    }

    /// Greedily offer adjacent untouched pairs to the LLM.
    async fn llm_phase(
        &self,
        llm: &dyn LlmClient,
        intents: &[Intent],
        units: Vec<Unit>,
        ctx: &RequestContext,
    ) -> (Vec<Unit>, bool) {
        let index = PositionIndex::new(intents);
        let mut out: Vec<Unit> = Vec::with_capacity(units.len());
        let mut merged_any = false;
        let mut iter = units.into_iter().peekable();

        while let Some(current) = iter.next() {
            let candidate = match iter.peek() {
                Some(next) if eligible(&current) && eligible(next) => {
                    let positions = [current.members[0], next.members[0]];
                    if index.ordered(intents, &positions) {
                        self.ask_llm(llm, &current.intent, &next.intent, ctx).await
                    } else {
                        None
                    }
                }
                _ => None,
            };

            match (candidate, iter.peek()) {
                (Some(fused), Some(_)) => {
                    if let Some(next) = iter.next() {
                        out.push(merge_pair(current, next, fused));
                        merged_any = true;
                    }
                }
                _ => out.push(current),
            }
        }
        (out, merged_any)
    }

    async fn ask_llm(
        &self,
        llm: &dyn LlmClient,
        first: &Intent,
        second: &Intent,
        ctx: &RequestContext,
    ) -> Option<FusedIntentReply> {
        let prompt = format!(
            "{}\n\nIntent A: {}\nIntent B: {}",
            LLM_FUSION_PROMPT,
            describe_intent(first),
            describe_intent(second)
        );
        let outcome: Result<FusionReply> = async {
            let response = bounded("fusion LLM", self.llm_timeout, &ctx.cancel, llm.complete(&prompt)).await?;
            parse_json(&response.content)
        }
        .await;

        match outcome {
            Ok(reply) if reply.should_fuse && reply.confidence >= self.config.llm_fusion_confidence_threshold => {
                reply.fused_intent
            }
            Ok(reply) => {
                tracing::debug!(
                    should_fuse = reply.should_fuse,
                    confidence = reply.confidence,
                    "LLM fusion declined"
                );
                None
            }
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "LLM fusion check failed");
                None
            }
        }
    }
}

/// Only raw recognizer intents are offered to the LLM.
fn eligible(unit: &Unit) -> bool {
    !unit.is_merged() && !unit.intent.is_compound()
}

fn merge_pair(first: Unit, second: Unit, reply: FusedIntentReply) -> Unit {
    let mut members = first.members.clone();
    members.extend(second.members.iter().copied());

    let internal: BTreeSet<u32> = [first.intent.priority, second.intent.priority].into_iter().collect();
    let dependencies: Vec<u32> = first
        .intent
        .dependencies
        .iter()
        .chain(second.intent.dependencies.iter())
        .copied()
        .filter(|d| !internal.contains(d))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut entities = first.intent.entities.clone();
    for (k, v) in &second.intent.entities {
        entities.entry(k.clone()).or_insert_with(|| v.clone());
    }

    let params = if reply.params.is_empty() {
        let mut p = first.intent.params.clone();
        for (k, v) in &second.intent.params {
            p.entry(k.clone()).or_insert_with(|| v.clone());
        }
        p
    } else {
        reply.params
    };

    Unit {
        intent: Intent {
            kind: reply.kind,
            params,
            priority: first.intent.priority,
            dependencies,
            confidence: first.intent.confidence.min(second.intent.confidence),
            entities,
            merged_from: vec![first.intent.kind.clone(), second.intent.kind.clone()],
        },
        members,
    }
}

/// Assign priorities 1..n and map every dependency onto the unit that now
/// covers it.
fn renumber(intents: &[Intent], units: Vec<Unit>) -> Vec<Intent> {
    let mut owner: HashMap<u32, u32> = HashMap::new();
    for (slot, unit) in units.iter().enumerate() {
        for &pos in &unit.members {
            owner.insert(intents[pos].priority, slot as u32 + 1);
        }
    }

    units
        .into_iter()
        .enumerate()
        .map(|(slot, unit)| {
            let own = slot as u32 + 1;
            let deps: BTreeSet<u32> = unit
                .intent
                .dependencies
                .iter()
                .filter_map(|d| owner.get(d).copied())
                .filter(|d| *d != own)
                .collect();
            Intent {
                priority: own,
                dependencies: deps.into_iter().collect(),
                ..unit.intent
            }
        })
        .collect()
}
