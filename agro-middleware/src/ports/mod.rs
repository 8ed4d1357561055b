/**
 * HISTORY PORT - Append-only persistence of sensor and actuator events
 *
 * ROLE :
 * Every reading received and every command sent by an active controller is
 * appended here. The store is read back for two things: state recovery right
 * after a promotion, and the history view of the dashboard.
 *
 * CONTRACT :
 * - `insert` appends, nothing is ever updated or deleted
 * - queries filter on controller key + data type
 * - results are sorted by timestamp, most recent first; equal timestamps keep
 *   the later insert first
 *
 * Writes are best-effort for callers: a failing store is logged and the
 * control flow carries on without the record.
 */

pub mod history;

pub use history::{JsonlHistoryStore, MemoryHistoryStore};

use crate::models::{DataType, HistoryRecord};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Filter shared by every query. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub controller: Option<String>,
    pub data_type: Option<DataType>,
}

impl HistoryFilter {
    pub fn new(controller: &str, data_type: DataType) -> Self {
        Self { controller: Some(controller.to_string()), data_type: Some(data_type) }
    }

    pub fn matches(&self, record: &HistoryRecord) -> bool {
        self.controller.as_deref().map_or(true, |c| c == record.controller)
            && self.data_type.map_or(true, |t| t == record.data_type)
    }
}

pub trait HistoryStore: Send + Sync {
    fn insert(&self, record: &HistoryRecord) -> Result<(), StoreError>;

    /// Up to `limit` matching records, most recent first.
    fn find_many(
        &self,
        filter: &HistoryFilter,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, StoreError>;

    fn find_latest(&self, filter: &HistoryFilter) -> Result<Option<HistoryRecord>, StoreError> {
        Ok(self.find_many(filter, 1)?.into_iter().next())
    }

    /// Short description for logs and `/system/health`
    fn describe(&self) -> String;
}

pub type SharedStore = Arc<dyn HistoryStore>;

/// Most-recent-first selection over records kept in insertion order.
pub(crate) fn select_latest(
    records: &[HistoryRecord],
    filter: &HistoryFilter,
    limit: usize,
) -> Vec<HistoryRecord> {
    // walking backwards puts later inserts first, the stable sort keeps that for ties
    let mut hits: Vec<HistoryRecord> =
        records.iter().rev().filter(|r| filter.matches(r)).cloned().collect();
    hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    hits.truncate(limit);
    hits
}
