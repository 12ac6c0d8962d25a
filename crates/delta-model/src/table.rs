use crate::{events::ChangeEvent, schema::TableSchema};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `(project, dataset, table)` — the warehouse-side coordinate of a target
/// table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// The state-store key used to persist the `TargetTableState` for this
    /// table.
    pub fn state_key(&self) -> String {
        format!("bigquery-{}-{}", self.dataset, self.table)
    }

    /// The state-store key for the stale-direct-load-in-progress flag.
    pub fn direct_load_flag_key(&self) -> String {
        format!(
            "bigquery-direct-load-in-progress-{}-{}",
            self.dataset, self.table
        )
    }

    pub fn staging_table_name(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.table)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Bookkeeping columns injected by the core into every target table.
pub mod supplementary_columns {
    pub const SEQUENCE_NUM: &str = "_sequence_num";
    pub const IS_DELETED: &str = "_is_deleted";
    pub const ROW_ID: &str = "_row_id";
    pub const SOURCE_TIMESTAMP: &str = "_source_timestamp";
    pub const SORT: &str = "_sort";
    pub const OP: &str = "_op";
    pub const BATCH_ID: &str = "_batch_id";

    pub fn before_prefixed(pk_column: &str) -> String {
        format!("_before_{pk_column}")
    }

    pub fn sort_key_field(index: usize) -> String {
        format!("_key_{index}")
    }
}

/// Per-`TableId` metadata, cached in-memory and mirrored to the state store
/// under `TableId::state_key()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetTableState {
    /// Non-empty ordered list of normalized column names. A table with an
    /// empty PK is rejected with a fatal error before this type is ever
    /// constructed.
    pub primary_keys: Vec<String>,
    /// Present iff source ordering is `Unordered`.
    pub sort_key_types: Option<Vec<crate::value::DataType>>,
    /// True once the `_sort` column exists in the target.
    pub sort_key_added_to_target: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("table {0} declared with an empty primary key")]
pub struct EmptyPrimaryKeyError(pub TableId);

impl TargetTableState {
    pub fn new(primary_keys: Vec<String>, table: &TableId) -> Result<Self, EmptyPrimaryKeyError> {
        if primary_keys.is_empty() {
            return Err(EmptyPrimaryKeyError(table.clone()));
        }
        Ok(Self {
            primary_keys,
            sort_key_types: None,
            sort_key_added_to_target: false,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BlobType {
    Snapshot,
    Streaming,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BlobFormat {
    Avro,
    Json,
}

/// All events for one table batched toward a single blob-store object.
/// `batch_id` is the wall-clock timestamp (ms) at first append.
#[derive(Debug, Clone)]
pub struct BatchShard {
    pub table: TableId,
    pub schema_fingerprint: String,
    pub batch_id: i64,
    pub blob_type: BlobType,
    pub schema: TableSchema,
    pub events: Vec<ChangeEvent>,
}

impl BatchShard {
    pub fn new(
        table: TableId,
        schema_fingerprint: String,
        batch_id: i64,
        blob_type: BlobType,
        schema: TableSchema,
    ) -> Self {
        Self {
            table,
            schema_fingerprint,
            batch_id,
            blob_type,
            schema,
            events: Vec::new(),
        }
    }

    pub fn max_sequence_number(&self) -> Option<u64> {
        self.events.iter().map(|e| e.sequence_number()).max()
    }
}

/// Output of C2 (Blob Writer) handed to C3 (Batch Writer) and onward to C5
/// (Load Stage).
#[derive(Debug, Clone)]
pub struct TableBlob {
    pub table: TableId,
    pub source_schema_name: String,
    pub batch_id: i64,
    pub blob_type: BlobType,
    pub blob_handle: String,
    pub staging_schema: TableSchema,
    pub target_schema: TableSchema,
    pub num_events: usize,
    pub format: BlobFormat,
}

/// In-memory, per-`TableId` sequence bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceCounters {
    /// Highest sequence written to a blob.
    pub latest_seen: u64,
    /// Highest sequence known-applied to target.
    pub latest_merged: u64,
}

impl SequenceCounters {
    pub fn seeded(latest_merged: u64) -> Self {
        Self {
            latest_seen: latest_merged,
            latest_merged,
        }
    }
}
