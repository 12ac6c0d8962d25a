use crate::{schema::TableSchema, value::Value};
use serde::{Deserialize, Serialize};

/// Opaque upstream offset (opaque byte string), carried through unexamined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Offset(pub Vec<u8>);

pub type SequenceNumber = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DdlOperation {
    CreateDatabase,
    DropDatabase,
    CreateTable,
    DropTable,
    AlterTable,
    TruncateTable,
    RenameTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdlEvent {
    pub operation: DdlOperation,
    pub database: String,
    pub table: String,
    pub prev_table: Option<String>,
    pub schema: TableSchema,
    pub primary_key: Vec<String>,
    pub snapshot: bool,
    pub offset: Offset,
    pub sequence_number: SequenceNumber,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DmlOperation {
    Insert,
    Update,
    Delete,
}

impl DmlOperation {
    pub fn as_op_tag(&self) -> &'static str {
        match self {
            DmlOperation::Insert => "INSERT",
            DmlOperation::Update => "UPDATE",
            DmlOperation::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmlEvent {
    pub operation: DmlOperation,
    pub database: String,
    pub table: String,
    /// Post-image row values.
    pub after: Vec<(String, Value)>,
    /// `_before_*` image of the primary-key columns, present for `Update`.
    pub before_pk: Option<Vec<(String, Value)>>,
    /// Opaque per-row identifier assigned by the source, when supported.
    pub row_id: Option<String>,
    /// Microsecond-resolution source timestamp, required when unordered.
    pub source_timestamp: Option<i64>,
    /// Ordered tuple of primitive values totally ordering events when
    /// `sequence_number` cannot (unordered sources).
    pub sort_keys: Option<Vec<Value>>,
    pub snapshot: bool,
    pub offset: Offset,
    pub sequence_number: SequenceNumber,
}

impl DmlEvent {
    pub fn after_value(&self, column: &str) -> Option<&Value> {
        self.after.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn before_pk_value(&self, column: &str) -> Option<&Value> {
        self.before_pk
            .as_ref()
            .and_then(|cols| cols.iter().find(|(c, _)| c == column))
            .map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChangeEvent {
    Ddl(DdlEvent),
    Dml(DmlEvent),
}

impl ChangeEvent {
    pub fn offset(&self) -> &Offset {
        match self {
            ChangeEvent::Ddl(e) => &e.offset,
            ChangeEvent::Dml(e) => &e.offset,
        }
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        match self {
            ChangeEvent::Ddl(e) => e.sequence_number,
            ChangeEvent::Dml(e) => e.sequence_number,
        }
    }

    pub fn database(&self) -> &str {
        match self {
            ChangeEvent::Ddl(e) => &e.database,
            ChangeEvent::Dml(e) => &e.database,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            ChangeEvent::Ddl(e) => &e.table,
            ChangeEvent::Dml(e) => &e.table,
        }
    }
}
