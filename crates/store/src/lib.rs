//! History Store for IntentFlow.
//!
//! Append-only persistence of the outcome records written by every pipeline
//! component, plus typed statistics over them.

pub mod memory;
pub mod sqlite;
pub mod stats;

use std::sync::Arc;

use intentflow_core::{config::StoreConfig, Error, HistoryStore, Result};

pub use memory::InMemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;
pub use stats::{
    correction_stats, distillation_stats, fusion_stats, CorrectionStats, DistillationStats, FusionStats,
    MAX_STATS_DAYS,
};

/// Open the backend named in config.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn HistoryStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryHistoryStore::new())),
        "sqlite" => {
            if let Some(parent) = std::path::Path::new(&config.sqlite_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| Error::storage(format!("create {}: {}", parent.display(), e)))?;
                }
            }
            Ok(Arc::new(SqliteHistoryStore::open(&config.sqlite_path)?))
        }
        other => Err(Error::config(format!("unknown store backend '{}'", other))),
    }
}
