use delta_connectors::{BlobStoreError, WarehouseError};
use delta_model::table::EmptyPrimaryKeyError;
use thiserror::Error;

/// Errors raised mid-operation that the retry coordinator is expected to
/// classify as transient or fatal.
#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),

    #[error("state store error: {0}")]
    StateStore(#[from] StateStoreError),

    #[error(transparent)]
    EmptyPrimaryKey(#[from] EmptyPrimaryKeyError),

    #[error("operation was cancelled")]
    Cancelled,
}

impl DeltaError {
    pub fn is_transient(&self) -> bool {
        match self {
            DeltaError::Warehouse(e) => e.is_transient() || e.is_conflict(),
            DeltaError::BlobStore(_) => true,
            DeltaError::StateStore(_) => false,
            DeltaError::EmptyPrimaryKey(_) => false,
            DeltaError::Cancelled => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("transaction aborted: {0}")]
    Transaction(String),
}

/// Fatal, non-retryable failures that abort the whole pipeline for a table
/// (or the whole app, for `CreateDatabase`/`DropDatabase`).
#[derive(Debug, Error)]
pub enum DeltaFailure {
    #[error(transparent)]
    EmptyPrimaryKey(#[from] EmptyPrimaryKeyError),

    #[error("retry attempts exhausted: {0}")]
    RetriesExhausted(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("fatal error: {0}")]
    Other(String),
}

impl From<DeltaError> for DeltaFailure {
    fn from(err: DeltaError) -> Self {
        DeltaFailure::Other(err.to_string())
    }
}
