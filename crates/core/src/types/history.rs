use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::context::RequestContext;

// =============================================================================
// History Types
// =============================================================================

/// Kind of outcome record kept in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Fusion,
    Distillation,
    Plan,
    Checkpoint,
    Correction,
    Pipeline,
}

impl RecordKind {
    pub const ALL: [RecordKind; 6] = [
        Self::Fusion,
        Self::Distillation,
        Self::Plan,
        Self::Checkpoint,
        Self::Correction,
        Self::Pipeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fusion => "fusion",
            Self::Distillation => "distillation",
            Self::Plan => "plan",
            Self::Checkpoint => "checkpoint",
            Self::Correction => "correction",
            Self::Pipeline => "pipeline",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope around a component's outcome payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub kind: RecordKind,
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub payload: Value,
}

impl HistoryRecord {
    /// Wrap a payload for the given request.
    pub fn new(kind: RecordKind, ctx: &RequestContext, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            session_id: ctx.session_id.clone(),
            user_id: ctx.user_id.clone(),
            created_at: Utc::now(),
            payload,
        }
    }

    /// Look up a dotted path (`a.b.c`) inside the payload.
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.payload, |v, key| v.get(key))
    }
}

/// Record filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryFilter {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Inclusive lower bound on `created_at`.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record passes every set criterion except `limit`.
    pub fn matches(&self, record: &HistoryRecord) -> bool {
        if let Some(s) = &self.session_id {
            if &record.session_id != s {
                return false;
            }
        }
        if let Some(u) = &self.user_id {
            if &record.user_id != u {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.created_at >= until {
                return false;
            }
        }
        true
    }
}

/// Payload types that know which history kind they belong to.
pub trait Recordable: Serialize + DeserializeOwned {
    const KIND: RecordKind;
}

/// Interpret a JSON value as a number; booleans count as 1/0.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
