//! Shared identifiers, errors, row representation, and configuration for the engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
pub use types::Value;

pub type PageId = u32;
pub type SlotId = u16;
pub type TableId = u64;

/// `(page_id, slot_id)` — identifies a record within a table's pages (spec section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_id: SlotId,
}

impl RecordId {
    pub fn new(page_id: PageId, slot_id: SlotId) -> Self {
        Self { page_id, slot_id }
    }
}

/// A tuple of values, optionally tagged with the RID it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Row {
    pub values: Vec<Value>,
    #[serde(skip)]
    pub rid: Option<RecordId>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values, rid: None }
    }

    pub fn with_rid(values: Vec<Value>, rid: RecordId) -> Self {
        Self {
            values,
            rid: Some(rid),
        }
    }

    pub fn set_rid(&mut self, rid: RecordId) {
        self.rid = Some(rid);
    }

    pub fn rid(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// The one error type returned by every crate in this workspace (spec section 7).
#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("storage I/O error: {0}")]
    StorageIoError(#[from] std::io::Error),

    #[error("page id {page_id} out of range (page_count = {page_count})")]
    PageOutOfRange { page_id: PageId, page_count: u32 },

    #[error("out of page space: page {page_id} cannot fit {needed} more bytes")]
    OutOfPageSpace { page_id: PageId, needed: usize },

    #[error("record at slot {slot_id} on page {page_id} has been deleted")]
    RecordDeleted { page_id: PageId, slot_id: SlotId },

    #[error("buffer pool exhausted: all {capacity} frames are pinned")]
    BufferPoolExhausted { capacity: usize },

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("index not found: {table}.{index}")]
    IndexNotFound { table: String, index: String },

    #[error("index already exists: {table}.{index}")]
    IndexExists { table: String, index: String },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("unsupported predicate: {0}")]
    UnsupportedPredicate(String),

    #[error("cannot coerce value to declared type: {0}")]
    TypeCoercionError(String),

    #[error("row encoding error: {0}")]
    EncodingError(#[from] serde_json::Error),

    #[error("{0}")]
    Executor(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Buffer pool eviction policy (spec section 4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BufferPoolPolicy {
    Lru,
    Fifo,
}

/// Engine-wide configuration surface (spec section 6).
#[derive(Debug, Clone, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    #[builder(default = PathBuf::from("./db_data"))]
    pub data_dir: PathBuf,
    #[builder(default = 4096)]
    pub page_size: u32,
    #[builder(default = 256)]
    pub buffer_pool_capacity: usize,
    #[builder(default = BufferPoolPolicy::Lru)]
    pub buffer_pool_policy: BufferPoolPolicy,
    #[builder(default = 64)]
    pub bptree_order: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

/// Per-operator execution statistics, mirroring the teacher's `ExecutionStats` shape.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    pub open_time: std::time::Duration,
    pub total_next_time: std::time::Duration,
    pub close_time: std::time::Duration,
    pub rows_produced: u64,
    pub rows_filtered: u64,
    pub pages_scanned: u64,
}

impl ExecutionStats {
    pub fn total_time(&self) -> std::time::Duration {
        self.open_time + self.total_next_time + self.close_time
    }
}

pub mod prelude {
    pub use crate::{
        BufferPoolPolicy, Config, DbError, DbResult, PageId, RecordId, Row, SlotId, TableId,
    };
    pub use types::{SqlType, Value};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.page_size, 4096);
        assert_eq!(cfg.buffer_pool_capacity, 256);
        assert_eq!(cfg.bptree_order, 64);
        assert_eq!(cfg.buffer_pool_policy, BufferPoolPolicy::Lru);
    }

    #[test]
    fn row_rid_roundtrip() {
        let mut row = Row::new(vec![Value::Int(1)]);
        assert!(row.rid().is_none());
        row.set_rid(RecordId::new(3, 7));
        assert_eq!(row.rid(), Some(RecordId::new(3, 7)));
    }

    #[test]
    fn row_serializes_without_rid() {
        let mut row = Row::new(vec![Value::Int(1)]);
        row.set_rid(RecordId::new(3, 7));
        let json = serde_json::to_string(&row).unwrap();
        assert!(!json.contains("rid"));
    }
}

