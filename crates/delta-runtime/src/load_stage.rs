use delta_connectors::{JobStatus, LoadJobSpec, Warehouse};
use delta_core::{DeltaError, DeltaFailure, RetryDisposition, RetryError, RetryPolicy, StateStore};
use delta_model::{BlobFormat, TableBlob, TableId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn classify(err: &DeltaError) -> RetryDisposition {
    if err.is_transient() {
        RetryDisposition::Retry
    } else {
        RetryDisposition::Stop
    }
}

/// Loads a blob into its staging table ahead of the merge, or straight into
/// the target for a snapshot blob. The job id is derived only from
/// `(table, batchId)` so a replay of the same batch resolves to the same
/// load job instead of loading it twice.
pub struct LoadStage {
    warehouse: Arc<dyn Warehouse>,
    state: Arc<dyn StateStore>,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl LoadStage {
    pub fn new(warehouse: Arc<dyn Warehouse>, state: Arc<dyn StateStore>, retry: RetryPolicy) -> Self {
        Self {
            warehouse,
            state,
            retry,
            poll_interval: Duration::from_millis(50),
        }
    }

    fn job_id(staging_table: &TableId, batch_id: i64) -> String {
        format!("load-{}-{}-{}", staging_table.dataset, staging_table.table, batch_id)
    }

    fn direct_job_id(target: &TableId, batch_id: i64) -> String {
        format!("direct-{}-{}-{}", target.dataset, target.table, batch_id)
    }

    pub async fn load(
        &self,
        staging_table: &TableId,
        blob: &TableBlob,
        cancel: &CancellationToken,
    ) -> Result<(), DeltaFailure> {
        let staging_table = staging_table.clone();
        let blob_handle = blob.blob_handle.clone();
        let format = blob.format;
        let staging_schema = blob.staging_schema.clone();
        let batch_id = blob.batch_id;

        let job_id = Self::job_id(&staging_table, batch_id);
        let result = self
            .retry
            .run(
                cancel,
                || self.submit_and_wait(&job_id, &staging_table, &blob_handle, format, &staging_schema),
                classify,
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(RetryError::Fatal(e)) => Err(e.into()),
            Err(RetryError::AttemptsExceeded(e)) => Err(DeltaFailure::RetriesExhausted(e.to_string())),
            Err(RetryError::Cancelled) => Err(DeltaError::Cancelled.into()),
        }
    }

    /// Loads a snapshot blob straight into the target table, bypassing
    /// staging and merge entirely. Guarded by the direct-load-in-progress
    /// flag so a crash mid-load leaves a marker C4's `CreateTable` checks
    /// before trusting an existing target as complete.
    pub async fn load_direct(
        &self,
        target: &TableId,
        blob: &TableBlob,
        cancel: &CancellationToken,
    ) -> Result<(), DeltaFailure> {
        let target = target.clone();
        let blob_handle = blob.blob_handle.clone();
        let format = blob.format;
        let target_schema = blob.target_schema.clone();
        let batch_id = blob.batch_id;
        let job_id = Self::direct_job_id(&target, batch_id);

        self.state
            .set_direct_load_flag(&target, true)
            .await
            .map_err(DeltaError::from)?;

        let result = self
            .retry
            .run(
                cancel,
                || self.submit_and_wait(&job_id, &target, &blob_handle, format, &target_schema),
                classify,
            )
            .await;

        let result = match result {
            Ok(()) => Ok(()),
            Err(RetryError::Fatal(e)) => Err(e.into()),
            Err(RetryError::AttemptsExceeded(e)) => Err(DeltaFailure::RetriesExhausted(e.to_string())),
            Err(RetryError::Cancelled) => Err(DeltaError::Cancelled.into()),
        };

        if result.is_ok() {
            self.state
                .set_direct_load_flag(&target, false)
                .await
                .map_err(DeltaError::from)?;
        }
        result
    }

    async fn submit_and_wait(
        &self,
        job_id: &str,
        staging_table: &TableId,
        source_uri: &str,
        format: BlobFormat,
        schema: &delta_model::TableSchema,
    ) -> Result<(), DeltaError> {
        let handle = match self.warehouse.find_job(job_id).await? {
            Some(h) => h,
            None => {
                self.warehouse
                    .submit_load_job(LoadJobSpec {
                        job_id: job_id.to_string(),
                        staging_table,
                        source_uri,
                        format,
                        schema,
                    })
                    .await?
            }
        };

        loop {
            match self.warehouse.poll_job(&handle).await? {
                JobStatus::Succeeded => return Ok(()),
                JobStatus::Running => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_connectors::InMemoryWarehouse;
    use delta_core::SledStateStore;
    use delta_model::{BlobType, ColumnSchema, DataType, TableSchema};
    use tempfile::tempdir;

    fn stage(warehouse: Arc<dyn Warehouse>) -> (LoadStage, Arc<dyn StateStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let state: Arc<dyn StateStore> = Arc::new(SledStateStore::open(dir.path()).unwrap());
        (LoadStage::new(warehouse, state.clone(), RetryPolicy::default()), state, dir)
    }

    fn blob(blob_type: BlobType) -> (TableBlob, TableSchema) {
        let schema = TableSchema::new(vec![ColumnSchema::new("id", DataType::Int64, false)]);
        let blob = TableBlob {
            table: TableId::new("p", "d", "orders"),
            source_schema_name: "fp".to_string(),
            batch_id: 7,
            blob_type,
            blob_handle: "gs://bucket/key".to_string(),
            staging_schema: schema.clone(),
            target_schema: schema.clone(),
            num_events: 1,
            format: BlobFormat::Avro,
        };
        (blob, schema)
    }

    #[tokio::test]
    async fn load_completes_against_the_in_memory_warehouse() {
        let warehouse: Arc<dyn Warehouse> = Arc::new(InMemoryWarehouse::new());
        let (stage, _state, _dir) = stage(warehouse);
        let cancel = CancellationToken::new();

        let staging = TableId::new("p", "d", "orders_staging");
        let (blob, _schema) = blob(BlobType::Streaming);

        stage.load(&staging, &blob, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn direct_load_clears_the_in_progress_flag_on_success() {
        let warehouse: Arc<dyn Warehouse> = Arc::new(InMemoryWarehouse::new());
        let (stage, state, _dir) = stage(warehouse);
        let cancel = CancellationToken::new();

        let target = TableId::new("p", "d", "orders");
        let (blob, _schema) = blob(BlobType::Snapshot);

        stage.load_direct(&target, &blob, &cancel).await.unwrap();

        assert!(!state.get_direct_load_flag(&target).await.unwrap());
    }
}
