//! In-memory history store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use intentflow_core::{
    types::{HistoryFilter, HistoryRecord, RecordKind},
    HistoryStore, Result,
};

/// Append-only in-memory store with one list per record kind.
///
/// Suitable for tests and single-process deployments; contents are lost on
/// restart.
pub struct InMemoryHistoryStore {
    records: HashMap<RecordKind, RwLock<Vec<HistoryRecord>>>,
}

impl InMemoryHistoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            records: RecordKind::ALL
                .iter()
                .map(|k| (*k, RwLock::new(Vec::new())))
                .collect(),
        }
    }

    /// Total number of records across all kinds.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for list in self.records.values() {
            total += list.read().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn insert(&self, record: HistoryRecord) -> Result<()> {
        if let Some(list) = self.records.get(&record.kind) {
            let mut list = list.write().await;
            tracing::debug!(kind = %record.kind, id = %record.id, total = list.len() + 1, "History record appended");
            list.push(record);
        }
        Ok(())
    }

    async fn query(&self, kind: RecordKind, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>> {
        let Some(list) = self.records.get(&kind) else {
            return Ok(Vec::new());
        };
        let list = list.read().await;
        let mut matched: Vec<HistoryRecord> = list.iter().filter(|r| filter.matches(r)).cloned().collect();
        if let Some(limit) = filter.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentflow_core::RequestContext;
    use serde_json::json;

    fn rec(kind: RecordKind, session: &str, payload: serde_json::Value) -> HistoryRecord {
        HistoryRecord::new(kind, &RequestContext::new(session, "u1"), payload)
    }

    #[tokio::test]
    async fn test_insert_then_query_by_session() {
        let store = InMemoryHistoryStore::new();
        store.insert(rec(RecordKind::Fusion, "s1", json!({"n": 1}))).await.unwrap();
        store.insert(rec(RecordKind::Fusion, "s2", json!({"n": 2}))).await.unwrap();
        store.insert(rec(RecordKind::Plan, "s1", json!({}))).await.unwrap();

        let got = store
            .query(RecordKind::Fusion, &HistoryFilter::new().session("s1"))
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload["n"], 1);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_limit_keeps_most_recent_in_order() {
        let store = InMemoryHistoryStore::new();
        for n in 0..5 {
            store.insert(rec(RecordKind::Distillation, "s", json!({"n": n}))).await.unwrap();
        }
        let got = store
            .query(RecordKind::Distillation, &HistoryFilter::new().limit(2))
            .await
            .unwrap();
        let ns: Vec<i64> = got.iter().map(|r| r.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_default_aggregates() {
        let store = InMemoryHistoryStore::new();
        store.insert(rec(RecordKind::Correction, "s", json!({"finalSuccess": true, "attempts": 1}))).await.unwrap();
        store.insert(rec(RecordKind::Correction, "s", json!({"finalSuccess": false, "attempts": 3}))).await.unwrap();
        store.insert(rec(RecordKind::Correction, "s", json!({"other": "x"}))).await.unwrap();

        let f = HistoryFilter::new();
        assert_eq!(store.count(RecordKind::Correction, &f).await.unwrap(), 3);
        assert_eq!(store.sum(RecordKind::Correction, "finalSuccess", &f).await.unwrap(), 1.0);
        assert_eq!(store.average(RecordKind::Correction, "attempts", &f).await.unwrap(), Some(2.0));
        assert_eq!(store.average(RecordKind::Correction, "missing", &f).await.unwrap(), None);
    }
}
