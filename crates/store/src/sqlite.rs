//! SQLite-backed history store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use std::sync::Arc;

use intentflow_core::{
    error::Error,
    types::{HistoryFilter, HistoryRecord, RecordKind},
    HistoryStore, Result,
};

/// Persistent history in a single `history` table with a JSON payload column.
///
/// Timestamps are stored as microseconds since the epoch so range filters
/// compare numerically.
pub struct SqliteHistoryStore {
    conn: Arc<tokio::sync::Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::storage(format!("DB error: {}", e)))?;
        Self::init(conn)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::storage(format!("DB error: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                created_at INTEGER NOT NULL, -- microseconds
                payload TEXT NOT NULL        -- JSON
            );
            CREATE INDEX IF NOT EXISTS idx_history_kind ON history (kind, created_at);
            CREATE INDEX IF NOT EXISTS idx_history_session ON history (session_id);
            CREATE INDEX IF NOT EXISTS idx_history_user ON history (user_id);",
        )
        .map_err(|e| Error::storage(format!("Schema error: {}", e)))?;

        Ok(Self {
            conn: Arc::new(tokio::sync::Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }
}

/// `SELECT <columns> FROM history WHERE ...` honoring every filter field.
///
/// With a limit the inner query takes the newest N rows; the outer query
/// restores chronological order.
fn filtered_select(columns: &str, kind: RecordKind, filter: &HistoryFilter) -> (String, Vec<SqlValue>) {
    let mut clauses = vec!["kind = ?".to_string()];
    let mut args = vec![SqlValue::Text(kind.as_str().to_string())];

    if let Some(s) = &filter.session_id {
        clauses.push("session_id = ?".into());
        args.push(SqlValue::Text(s.clone()));
    }
    if let Some(u) = &filter.user_id {
        clauses.push("user_id = ?".into());
        args.push(SqlValue::Text(u.clone()));
    }
    if let Some(since) = filter.since {
        clauses.push("created_at >= ?".into());
        args.push(SqlValue::Integer(since.timestamp_micros()));
    }
    if let Some(until) = filter.until {
        clauses.push("created_at < ?".into());
        args.push(SqlValue::Integer(until.timestamp_micros()));
    }

    let where_sql = clauses.join(" AND ");
    let sql = match filter.limit {
        Some(limit) => {
            args.push(SqlValue::Integer(limit as i64));
            format!(
                "SELECT {columns} FROM (
                    SELECT rowid AS seq, * FROM history WHERE {where_sql}
                    ORDER BY created_at DESC, rowid DESC LIMIT ?
                 ) ORDER BY created_at ASC, seq ASC"
            )
        }
        None => format!("SELECT {columns} FROM history WHERE {where_sql} ORDER BY created_at ASC, rowid ASC"),
    };
    (sql, args)
}

/// `$.a.b` JSON path from a dotted field name.
fn json_path(field: &str) -> String {
    format!("$.{}", field)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, i64, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn insert(&self, record: HistoryRecord) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO history (id, kind, session_id, user_id, created_at, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.kind.as_str(),
                    record.session_id,
                    record.user_id,
                    record.created_at.timestamp_micros(),
                    payload
                ],
            )
            .map_err(|e| Error::storage(format!("Insert error: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn query(&self, kind: RecordKind, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>> {
        let (sql, args) = filtered_select("id, kind, session_id, user_id, created_at, payload", kind, filter);
        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| Error::storage(format!("Prepare error: {}", e)))?;
                let rows = stmt
                    .query_map(params_from_iter(args.iter()), row_to_record)
                    .map_err(|e| Error::storage(format!("Query error: {}", e)))?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| Error::storage(format!("Row error: {}", e)))?;
                Ok(rows)
            })
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, kind_name, session_id, user_id, micros, payload) in rows {
            let Some(kind) = RecordKind::parse(&kind_name) else {
                tracing::warn!(id = %id, kind = %kind_name, "Skipping history row with unknown kind");
                continue;
            };
            let created_at: DateTime<Utc> = DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| Error::storage(format!("invalid timestamp {} on {}", micros, id)))?;
            records.push(HistoryRecord {
                id,
                kind,
                session_id,
                user_id,
                created_at,
                payload: serde_json::from_str(&payload)?,
            });
        }
        Ok(records)
    }

    async fn count(&self, kind: RecordKind, filter: &HistoryFilter) -> Result<usize> {
        let (inner, args) = filtered_select("id", kind, filter);
        let sql = format!("SELECT COUNT(*) FROM ({inner})");
        self.with_conn(move |conn| {
            let n: i64 = conn
                .query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))
                .map_err(|e| Error::storage(format!("Count error: {}", e)))?;
            Ok(n.max(0) as usize)
        })
        .await
    }

    async fn sum(&self, kind: RecordKind, field: &str, filter: &HistoryFilter) -> Result<f64> {
        let (inner, mut args) = filtered_select("json_extract(payload, ?) AS v", kind, filter);
        args.insert(0, SqlValue::Text(json_path(field)));
        let sql = format!("SELECT TOTAL(v) FROM ({inner}) WHERE typeof(v) IN ('integer', 'real')");
        self.with_conn(move |conn| {
            conn.query_row(&sql, params_from_iter(args.iter()), |row| row.get::<_, f64>(0))
                .map_err(|e| Error::storage(format!("Sum error: {}", e)))
        })
        .await
    }

    async fn average(&self, kind: RecordKind, field: &str, filter: &HistoryFilter) -> Result<Option<f64>> {
        let (inner, mut args) = filtered_select("json_extract(payload, ?) AS v", kind, filter);
        args.insert(0, SqlValue::Text(json_path(field)));
        let sql = format!("SELECT AVG(v) FROM ({inner}) WHERE typeof(v) IN ('integer', 'real')");
        self.with_conn(move |conn| {
            conn.query_row(&sql, params_from_iter(args.iter()), |row| row.get::<_, Option<f64>>(0))
                .map_err(|e| Error::storage(format!("Average error: {}", e)))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use intentflow_core::RequestContext;
    use serde_json::json;

    fn rec(kind: RecordKind, session: &str, payload: serde_json::Value) -> HistoryRecord {
        HistoryRecord::new(kind, &RequestContext::new(session, "u1"), payload)
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let store = SqliteHistoryStore::open(&path).unwrap();
            store.insert(rec(RecordKind::Fusion, "s1", json!({"fusedCount": 2}))).await.unwrap();
        }
        let store = SqliteHistoryStore::open(&path).unwrap();
        let got = store.query(RecordKind::Fusion, &HistoryFilter::new()).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].session_id, "s1");
        assert_eq!(got[0].payload["fusedCount"], 2);
    }

    #[tokio::test]
    async fn test_filters_and_limit() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        for n in 0..4 {
            let session = if n % 2 == 0 { "even" } else { "odd" };
            store.insert(rec(RecordKind::Plan, session, json!({"n": n}))).await.unwrap();
        }
        store.insert(rec(RecordKind::Fusion, "even", json!({}))).await.unwrap();

        let even = store.query(RecordKind::Plan, &HistoryFilter::new().session("even")).await.unwrap();
        assert_eq!(even.len(), 2);

        let last_two = store.query(RecordKind::Plan, &HistoryFilter::new().limit(2)).await.unwrap();
        let ns: Vec<i64> = last_two.iter().map(|r| r.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![2, 3]);

        let future = store
            .query(RecordKind::Plan, &HistoryFilter::new().since(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        assert!(future.is_empty());
    }

    #[tokio::test]
    async fn test_json_aggregates() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        store.insert(rec(RecordKind::Distillation, "s", json!({"usedFallback": true, "q": {"score": 0.5}}))).await.unwrap();
        store.insert(rec(RecordKind::Distillation, "s", json!({"usedFallback": false, "q": {"score": 1.0}}))).await.unwrap();
        store.insert(rec(RecordKind::Distillation, "s", json!({"usedFallback": "n/a"}))).await.unwrap();

        let f = HistoryFilter::new();
        assert_eq!(store.count(RecordKind::Distillation, &f).await.unwrap(), 3);
        assert_eq!(store.sum(RecordKind::Distillation, "usedFallback", &f).await.unwrap(), 1.0);
        assert_eq!(store.average(RecordKind::Distillation, "q.score", &f).await.unwrap(), Some(0.75));
        assert_eq!(store.average(RecordKind::Distillation, "nothing", &f).await.unwrap(), None);
        assert_eq!(store.count(RecordKind::Distillation, &f.clone().limit(1)).await.unwrap(), 1);
    }
}
