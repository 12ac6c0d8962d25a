use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A primitive value as carried by an upstream change event or materialized
/// into a warehouse row. Deliberately smaller than a general SQL value type:
/// only the primitives the warehouse can represent natively, plus the
/// `Struct` variant used for the `_sort` supplementary column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Int64(i64),
    Float64(f64),
    Numeric(BigDecimal),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Struct(Vec<(String, Value)>),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Total order used by the unordered-source lexicographic sort-key
    /// comparator. Only meaningful for the primitive variants that
    /// can legally appear inside a `_sort` struct; comparing mismatched
    /// variants is a programmer error upstream (schema validation rejects
    /// sort-key type drift) and is treated as `Equal` here to keep the
    /// comparator total.
    pub fn cmp_sort_key(&self, other: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        use Value::*;
        match (self, other) {
            (Int64(a), Int64(b)) => a.cmp(b),
            (Float64(a), Float64(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Numeric(a), Numeric(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Column data types representable in the target warehouse, named after
/// BigQuery's GoogleSQL type system (the warehouse this core targets).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataType {
    Int64,
    Float64,
    Numeric,
    Bool,
    String,
    Bytes,
    Date,
    Timestamp,
    Struct,
}

impl DataType {
    /// Whether this type may participate as a clustering column: tables
    /// cluster by up to `maxClusteringColumns` PK columns whose declared
    /// types are cluster-eligible. BigQuery disallows clustering on
    /// floating point and struct columns.
    pub fn cluster_eligible(&self) -> bool {
        !matches!(self, DataType::Float64 | DataType::Struct)
    }

    pub fn bigquery_name(&self) -> &'static str {
        match self {
            DataType::Int64 => "INT64",
            DataType::Float64 => "FLOAT64",
            DataType::Numeric => "NUMERIC",
            DataType::Bool => "BOOL",
            DataType::String => "STRING",
            DataType::Bytes => "BYTES",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Struct => "STRUCT",
        }
    }
}
