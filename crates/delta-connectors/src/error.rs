use thiserror::Error;

/// Errors from the blob store (GCS-like object storage under the
/// `cdap/delta/<app>/<db>/<table>/<batchId>` prefix convention).
#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("object not found: gs://{bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobStoreError {
    /// Bucket-already-exists is routinely tolerated by callers (a prior
    /// attempt may have already created it); this distinguishes that case
    /// from a genuine transport failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BlobStoreError::Transport(msg) if msg.contains("409"))
    }
}

/// Errors from the warehouse connector (BigQuery-like dataset/table/job
/// operations).
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("avro encoding error: {0}")]
    Avro(#[from] apache_avro::Error),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WarehouseError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, WarehouseError::Transport(msg) if msg.contains("409"))
    }

    /// Transient errors are worth retrying (timeouts, 5xx, rate limiting);
    /// everything else is treated as fatal by the retry coordinator.
    pub fn is_transient(&self) -> bool {
        match self {
            WarehouseError::Transport(msg) => {
                msg.contains("500") || msg.contains("503") || msg.contains("429") || msg.contains("timeout")
            }
            _ => false,
        }
    }
}
