//! Deterministic fusion rules.
//!
//! Rules operate on contiguous runs of intents in input order. At every
//! position they are tried in a fixed order: pipeline sequences (longest
//! first), same-file pairs, homogeneous batches, then output-to-input chains.

use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

use intentflow_core::types::{Intent, IntentKind};

/// Pipeline sequences, longest first.
const SEQUENCES: &[(&[IntentKind], IntentKind)] = &[
    (
        &[IntentKind::GitAdd, IntentKind::GitCommit, IntentKind::GitPush],
        IntentKind::GitAddCommitPush,
    ),
    (&[IntentKind::GitAdd, IntentKind::GitCommit], IntentKind::GitAddAndCommit),
    (&[IntentKind::GitCommit, IntentKind::GitPush], IntentKind::GitCommitAndPush),
    (&[IntentKind::BuildProject, IntentKind::RunTests], IntentKind::BuildAndTest),
];

/// Same-file pairs.
const SAME_FILE_PAIRS: &[(IntentKind, IntentKind, IntentKind)] = &[
    (IntentKind::CreateFile, IntentKind::WriteFile, IntentKind::CreateAndWriteFile),
    (IntentKind::ReadFile, IntentKind::EditFile, IntentKind::ReadAndEditFile),
    (IntentKind::WriteFile, IntentKind::FormatCode, IntentKind::WriteAndFormatFile),
];

/// A fused (or passed-through) slot in the output.
#[derive(Debug, Clone)]
pub struct Unit {
    pub intent: Intent,
    /// Input positions covered by this unit.
    pub members: Vec<usize>,
}

impl Unit {
    pub fn single(intent: Intent, position: usize) -> Self {
        Self {
            intent,
            members: vec![position],
        }
    }

    pub fn is_merged(&self) -> bool {
        self.members.len() > 1
    }
}

/// Maps priorities to input positions.
pub struct PositionIndex(HashMap<u32, usize>);

impl PositionIndex {
    pub fn new(intents: &[Intent]) -> Self {
        Self(intents.iter().enumerate().map(|(i, it)| (it.priority, i)).collect())
    }

    pub fn position(&self, priority: u32) -> Option<usize> {
        self.0.get(&priority).copied()
    }

    /// Whether every dependency of every member points strictly before that member.
    ///
    /// Dependencies on members of the same group that come earlier are fine; a
    /// member waiting on itself or on something later blocks the group.
    pub fn ordered(&self, intents: &[Intent], positions: &[usize]) -> bool {
        positions.iter().all(|&p| {
            intents[p].dependencies.iter().all(|dep| match self.position(*dep) {
                Some(dp) => dp < p,
                None => false,
            })
        })
    }
}

/// Run the rule phase over `intents`, honoring `window` as the group size bound.
pub fn apply_rules(intents: &[Intent], window: usize) -> Vec<Unit> {
    let index = PositionIndex::new(intents);
    let mut units = Vec::with_capacity(intents.len());
    let mut i = 0;

    while i < intents.len() {
        let matched = try_sequence(intents, &index, i, window)
            .or_else(|| try_same_file(intents, &index, i, window))
            .or_else(|| try_batch(intents, &index, i, window))
            .or_else(|| try_chain(intents, &index, i, window));

        match matched {
            Some(unit) => {
                i += unit.members.len();
                units.push(unit);
            }
            None => {
                units.push(Unit::single(intents[i].clone(), i));
                i += 1;
            }
        }
    }
    units
}

fn try_sequence(intents: &[Intent], index: &PositionIndex, i: usize, window: usize) -> Option<Unit> {
    for (kinds, fused_kind) in SEQUENCES {
        let len = kinds.len();
        if len > window || i + len > intents.len() {
            continue;
        }
        let slice = &intents[i..i + len];
        if !slice.iter().zip(kinds.iter()).all(|(it, k)| &it.kind == k) {
            continue;
        }
        let positions: Vec<usize> = (i..i + len).collect();
        if !index.ordered(intents, &positions) {
            continue;
        }
        let Some(params) = union_params(slice) else {
            continue;
        };
        return Some(build_unit(intents, positions, fused_kind.clone(), params));
    }
    None
}

fn try_same_file(intents: &[Intent], index: &PositionIndex, i: usize, window: usize) -> Option<Unit> {
    if window < 2 || i + 1 >= intents.len() {
        return None;
    }
    let (a, b) = (&intents[i], &intents[i + 1]);
    let (_, _, fused_kind) = SAME_FILE_PAIRS
        .iter()
        .find(|(first, second, _)| &a.kind == first && &b.kind == second)?;

    match (a.file_path(), b.file_path()) {
        (Some(pa), Some(pb)) if pa == pb => {}
        _ => return None,
    }
    let positions = vec![i, i + 1];
    if !index.ordered(intents, &positions) {
        return None;
    }
    let params = union_params(&intents[i..i + 2])?;
    Some(build_unit(intents, positions, fused_kind.clone(), params))
}

fn try_batch(intents: &[Intent], index: &PositionIndex, i: usize, window: usize) -> Option<Unit> {
    let first = &intents[i];
    let (batch_kind, dim) = first.kind.batch()?;
    let side = side_params(first, dim.item_keys);

    let mut end = i + 1;
    while end < intents.len() && end - i < window {
        let next = &intents[end];
        if next.kind != first.kind || side_params(next, dim.item_keys) != side {
            break;
        }
        if !index.ordered(intents, &(i..=end).collect::<Vec<_>>()) {
            break;
        }
        end += 1;
    }
    if end - i < 2 {
        return None;
    }

    let positions: Vec<usize> = (i..end).collect();
    let items: Vec<Value> = intents[i..end]
        .iter()
        .map(|it| {
            let item: Map<String, Value> = dim
                .item_keys
                .iter()
                .filter_map(|k| it.params.get(*k).map(|v| (k.to_string(), v.clone())))
                .collect();
            Value::Object(item)
        })
        .collect();

    let mut params = side;
    params.insert(dim.collection.to_string(), Value::Array(items));
    Some(build_unit(intents, positions, batch_kind, params))
}

fn try_chain(intents: &[Intent], index: &PositionIndex, i: usize, window: usize) -> Option<Unit> {
    let mut end = i + 1;
    while end < intents.len() && end - i < window && chains_into(&intents[end - 1], &intents[end]) {
        if !index.ordered(intents, &(i..=end).collect::<Vec<_>>()) {
            break;
        }
        end += 1;
    }
    if end - i < 2 {
        return None;
    }

    let positions: Vec<usize> = (i..end).collect();
    let steps: Vec<Value> = intents[i..end]
        .iter()
        .map(|it| {
            let mut step = Map::new();
            step.insert("type".into(), Value::String(it.kind.to_string()));
            step.insert("params".into(), Value::Object(it.params.clone()));
            Value::Object(step)
        })
        .collect();
    let mut params = Map::new();
    params.insert("steps".into(), Value::Array(steps));
    Some(build_unit(intents, positions, IntentKind::ChainedTask, params))
}

/// Whether `next`'s required inputs are exactly what `prev` produces.
///
/// The link is only taken when `next` either declares the dependency or has
/// not been given those inputs explicitly.
fn chains_into(prev: &Intent, next: &Intent) -> bool {
    if prev.kind.is_compound() || next.kind.is_compound() {
        return false;
    }
    let outputs: BTreeSet<&str> = prev.kind.schema().outputs.iter().copied().collect();
    let inputs: BTreeSet<&str> = next.kind.schema().required.iter().copied().collect();
    if outputs.is_empty() || outputs != inputs {
        return false;
    }
    next.dependencies.contains(&prev.priority) || inputs.iter().all(|k| !next.params.contains_key(*k))
}

/// Params outside the batch dimension.
fn side_params(intent: &Intent, item_keys: &[&str]) -> Map<String, Value> {
    intent
        .params
        .iter()
        .filter(|(k, _)| !item_keys.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Union of params; `None` when two members disagree on a shared key.
fn union_params(intents: &[Intent]) -> Option<Map<String, Value>> {
    let mut merged = Map::new();
    for intent in intents {
        for (k, v) in &intent.params {
            match merged.get(k) {
                Some(existing) if existing != v => return None,
                Some(_) => {}
                None => {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
    }
    Some(merged)
}

fn build_unit(intents: &[Intent], positions: Vec<usize>, kind: IntentKind, params: Map<String, Value>) -> Unit {
    let members: Vec<&Intent> = positions.iter().map(|&p| &intents[p]).collect();
    let member_priorities: BTreeSet<u32> = members.iter().map(|m| m.priority).collect();

    let dependencies: Vec<u32> = members
        .iter()
        .flat_map(|m| m.dependencies.iter().copied())
        .filter(|d| !member_priorities.contains(d))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut entities = Map::new();
    for m in &members {
        for (k, v) in &m.entities {
            entities.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    let confidence = members.iter().map(|m| m.confidence).fold(1.0_f64, f64::min);

    let intent = Intent {
        kind,
        params,
        priority: members[0].priority,
        dependencies,
        confidence,
        entities,
        merged_from: members.iter().map(|m| m.kind.clone()).collect(),
    };
    Unit {
        intent,
        members: positions,
    }
}
