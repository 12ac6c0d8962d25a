use crate::value::DataType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// The post-event column schema carried by a `DDL` event, and the schema
/// stamped on a `BatchShard`. Its fingerprint identifies a column schema
/// version; a change ends the current batch shard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Deterministic content hash of the column list, used as the
    /// `schemaFingerprint` that keys open batch shards. Two schemas with
    /// the same columns in the same order hash identically; any
    /// add/drop/retype/reorder produces a different fingerprint, which is
    /// exactly what ends the batch on a schema-version change.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for col in &self.columns {
            hasher.update(col.name.as_bytes());
            hasher.update(&[col.data_type as u8]);
            hasher.update(&[col.nullable as u8]);
            hasher.update(b"\0");
        }
        hasher.finalize().to_hex().to_string()
    }
}
