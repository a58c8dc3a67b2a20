//! History Store traits.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::Result;
use crate::types::{numeric, HistoryFilter, HistoryRecord, RecordKind, Recordable};

/// Append-only store of component outcome records.
///
/// Records are never updated in place. Aggregates have default
/// implementations over `query`; backends may push them down.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a record. Visible to `query` as soon as this returns.
    async fn insert(&self, record: HistoryRecord) -> Result<()>;

    /// Records of `kind` matching `filter`, oldest first.
    async fn query(&self, kind: RecordKind, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>>;

    /// Number of matching records.
    async fn count(&self, kind: RecordKind, filter: &HistoryFilter) -> Result<usize> {
        Ok(self.query(kind, filter).await?.len())
    }

    /// Sum of a dotted payload field over matching records; booleans count 1/0.
    async fn sum(&self, kind: RecordKind, field: &str, filter: &HistoryFilter) -> Result<f64> {
        let records = self.query(kind, filter).await?;
        Ok(records
            .iter()
            .filter_map(|r| r.field(field).and_then(numeric))
            .sum())
    }

    /// Mean of a dotted payload field; `None` when no record carries it.
    async fn average(&self, kind: RecordKind, field: &str, filter: &HistoryFilter) -> Result<Option<f64>> {
        let records = self.query(kind, filter).await?;
        let values: Vec<f64> = records
            .iter()
            .filter_map(|r| r.field(field).and_then(numeric))
            .collect();
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
    }
}

/// Serialize and append a typed record.
pub async fn append_record<T: Recordable + Sync>(
    store: &dyn HistoryStore,
    ctx: &RequestContext,
    record: &T,
) -> Result<()> {
    let payload = serde_json::to_value(record)?;
    store.insert(HistoryRecord::new(T::KIND, ctx, payload)).await
}

/// Append a record, logging instead of failing.
pub async fn persist_best_effort<T: Recordable + Sync>(
    store: &dyn HistoryStore,
    ctx: &RequestContext,
    record: &T,
) {
    if let Err(e) = append_record(store, ctx, record).await {
        tracing::warn!(
            kind = %T::KIND,
            session_id = %ctx.session_id,
            error = %e,
            "Failed to persist history record"
        );
    }
}

/// Append a record unless the request was cancelled.
///
/// Components use this for their own records; after cancellation only the
/// final pipeline status is written.
pub async fn persist_unless_cancelled<T: Recordable + Sync>(
    store: &dyn HistoryStore,
    ctx: &RequestContext,
    record: &T,
) {
    if ctx.is_cancelled() {
        tracing::debug!(kind = %T::KIND, session_id = %ctx.session_id, "Request cancelled, record dropped");
        return;
    }
    persist_best_effort(store, ctx, record).await;
}

/// Query and decode typed records; undecodable payloads are skipped.
pub async fn fetch_records<T: Recordable>(
    store: &dyn HistoryStore,
    filter: &HistoryFilter,
) -> Result<Vec<T>> {
    let records = store.query(T::KIND, filter).await?;
    Ok(records
        .into_iter()
        .filter_map(|r| decode::<T>(r.payload))
        .collect())
}

fn decode<T: Recordable>(payload: Value) -> Option<T> {
    match serde_json::from_value(payload) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!(kind = %T::KIND, error = %e, "Skipping undecodable history record");
            None
        }
    }
}
