use delta_core::DeltaFailure;
use thiserror::Error;

/// Errors surfaced across the orchestrator's public contract. A
/// `FlushFailed` latches: once a table's flush fails, every subsequent
/// `apply_dml`/`apply_ddl` for that table rethrows it immediately rather
/// than continuing to apply events the caller believes already failed.
#[derive(Debug, Error, Clone)]
pub enum RuntimeError {
    #[error("table {table} flush failed: {source}")]
    FlushFailed { table: String, source: String },

    #[error("the orchestrator has already been stopped")]
    Stopped,

    #[error("table {0} was never registered with the orchestrator")]
    UnregisteredTable(String),
}

impl From<DeltaFailure> for RuntimeError {
    fn from(err: DeltaFailure) -> Self {
        RuntimeError::FlushFailed {
            table: String::new(),
            source: err.to_string(),
        }
    }
}
