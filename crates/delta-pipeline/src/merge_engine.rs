use delta_connectors::{JobHandle, JobStatus, Warehouse};
use delta_core::{DeltaError, DeltaFailure, RetryDisposition, RetryError, RetryPolicy, StateStore};
use delta_model::{MergeMode, SequenceCounters, TableId};
use delta_planner::{
    ast::common::TableRef,
    build_merge,
    renderer::{Render, Renderer},
    BigQuery, MergeBuildPlan,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::events::{DeltaEvent, DeltaEventBus};

fn classify(err: &DeltaError) -> RetryDisposition {
    if err.is_transient() {
        RetryDisposition::Retry
    } else {
        RetryDisposition::Stop
    }
}

/// Parameters for reconciling one sealed, loaded batch into its target
/// table via the generalized `MERGE` statement.
pub struct MergeJob<'a> {
    pub table: &'a TableId,
    pub staging_table: &'a TableId,
    pub batch_id: i64,
    pub mode: MergeMode,
    pub primary_keys: &'a [String],
    pub sort_key_count: usize,
    pub value_columns: &'a [String],
    pub soft_deletes: bool,
    pub max_sequence_in_batch: u64,
}

/// Report produced by `MergeEngine::dry_run`: the SQL a real run would
/// submit for this batch, and the watermark it was built against.
#[derive(Debug, Clone, Serialize)]
pub struct MergeDryRunReport {
    pub job_id: String,
    pub table: TableId,
    pub batch_id: i64,
    pub latest_merged: u64,
    pub generated_sql: String,
}

/// Builds and submits the MERGE for one batch, then advances `latestMerged`
/// once the job reports success. The job id is derived only from
/// `(table, batchId)`, never an attempt counter, so a crash-and-replay of
/// the same batch resubmits the identical id and `findJob` recovers the
/// prior attempt's outcome instead of double-applying it.
pub struct MergeEngine {
    warehouse: Arc<dyn Warehouse>,
    state: Arc<dyn StateStore>,
    dialect: BigQuery,
    retry: RetryPolicy,
    bus: DeltaEventBus,
    poll_interval: Duration,
}

impl MergeEngine {
    pub fn new(warehouse: Arc<dyn Warehouse>, state: Arc<dyn StateStore>, retry: RetryPolicy, bus: DeltaEventBus) -> Self {
        Self {
            warehouse,
            state,
            dialect: BigQuery,
            retry,
            bus,
            poll_interval: Duration::from_millis(50),
        }
    }

    fn job_id(table: &TableId, batch_id: i64) -> String {
        format!("merge-{}-{}-{}", table.dataset, table.table, batch_id)
    }

    /// Builds the MERGE statement for `job` against the `latestMerged`
    /// watermark currently on record, without submitting it anywhere.
    async fn build_sql(&self, job: &MergeJob<'_>) -> Result<(u64, String), DeltaFailure> {
        let latest_merged = self
            .state
            .get_sequence_counters(job.table)
            .await
            .map_err(DeltaError::from)?
            .map(|c| c.latest_merged)
            .unwrap_or(0);

        let staging_sql = format!(
            "`{}`.`{}`.`{}`",
            job.staging_table.project, job.staging_table.dataset, job.staging_table.table
        );
        let target_ref = TableRef::new(job.table.dataset.clone(), job.table.table.clone());

        let merge_stmt = build_merge(
            &self.dialect,
            &MergeBuildPlan {
                target_table: target_ref,
                staging_table_sql: &staging_sql,
                batch_id: job.batch_id,
                latest_merged,
                mode: job.mode,
                primary_keys: job.primary_keys,
                sort_key_count: job.sort_key_count,
                value_columns: job.value_columns,
                soft_deletes: job.soft_deletes,
            },
        );
        let mut r = Renderer::new(&self.dialect);
        merge_stmt.render(&mut r);
        Ok((latest_merged, r.finish()))
    }

    /// Builds and reports the MERGE a real run would submit for `job`,
    /// without executing it against the warehouse. Lets an operator inspect
    /// the generated SQL before committing to a run.
    pub async fn dry_run(&self, job: &MergeJob<'_>) -> Result<MergeDryRunReport, DeltaFailure> {
        let (latest_merged, generated_sql) = self.build_sql(job).await?;
        Ok(MergeDryRunReport {
            job_id: Self::job_id(job.table, job.batch_id),
            table: job.table.clone(),
            batch_id: job.batch_id,
            latest_merged,
            generated_sql,
        })
    }

    pub async fn merge(&self, job: &MergeJob<'_>, cancel: &CancellationToken) -> Result<u64, DeltaFailure> {
        let (latest_merged, sql) = self.build_sql(job).await?;

        let table = job.table.clone();
        let batch_id = job.batch_id;
        let result = self
            .retry
            .run(cancel, || self.submit_and_wait(&table, batch_id, &sql), classify)
            .await;

        match result {
            Ok(()) => {
                let new_latest = job.max_sequence_in_batch.max(latest_merged);
                self.state
                    .put_sequence_counters(job.table, SequenceCounters::seeded(new_latest))
                    .await
                    .map_err(DeltaError::from)?;
                self.bus.publish(DeltaEvent::MergeCompleted {
                    table: job.table.clone(),
                    batch_id: job.batch_id,
                    latest_merged: new_latest,
                });
                Ok(new_latest)
            }
            Err(RetryError::Fatal(e)) => Err(e.into()),
            Err(RetryError::AttemptsExceeded(e)) => Err(DeltaFailure::RetriesExhausted(e.to_string())),
            Err(RetryError::Cancelled) => Err(DeltaError::Cancelled.into()),
        }
    }

    async fn submit_and_wait(&self, table: &TableId, batch_id: i64, sql: &str) -> Result<(), DeltaError> {
        let job_id = Self::job_id(table, batch_id);

        let handle: JobHandle = match self.warehouse.find_job(&job_id).await? {
            Some(h) => h,
            None => {
                let h = self.warehouse.submit_query_job(&job_id, sql).await?;
                self.bus.publish(DeltaEvent::MergeSubmitted {
                    table: table.clone(),
                    batch_id,
                    job_id: job_id.clone(),
                });
                h
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
    use delta_model::{RowIdSupport, SourceOrdering};
    use tempfile::tempdir;

    fn tables() -> (TableId, TableId) {
        (
            TableId::new("p", "analytics", "orders"),
            TableId::new("p", "analytics", "orders_staging"),
        )
    }

    #[tokio::test]
    async fn merge_advances_latest_merged_and_publishes_completion() {
        let dir = tempdir().unwrap();
        let warehouse: Arc<dyn Warehouse> = Arc::new(InMemoryWarehouse::new());
        let state: Arc<dyn StateStore> = Arc::new(SledStateStore::open(dir.path()).unwrap());
        let bus = DeltaEventBus::default();
        let mut events = bus.subscribe();
        let engine = MergeEngine::new(warehouse, state.clone(), RetryPolicy::default(), bus);

        let (target, staging) = tables();
        let pks = vec!["id".to_string()];
        let cols = vec!["amount".to_string()];
        let mode = MergeMode::new(SourceOrdering::Ordered, RowIdSupport(true));
        let cancel = CancellationToken::new();

        let job = MergeJob {
            table: &target,
            staging_table: &staging,
            batch_id: 1700000000000,
            mode,
            primary_keys: &pks,
            sort_key_count: 0,
            value_columns: &cols,
            soft_deletes: false,
            max_sequence_in_batch: 7,
        };

        let latest = engine.merge(&job, &cancel).await.unwrap();
        assert_eq!(latest, 7);

        let counters = state.get_sequence_counters(&target).await.unwrap().unwrap();
        assert_eq!(counters.latest_merged, 7);

        match events.recv().await.unwrap() {
            DeltaEvent::MergeSubmitted { .. } => {}
            other => panic!("expected MergeSubmitted first, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            DeltaEvent::MergeCompleted { latest_merged, .. } => assert_eq!(latest_merged, 7),
            other => panic!("expected MergeCompleted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resubmitting_same_batch_reuses_the_existing_job() {
        let dir = tempdir().unwrap();
        let warehouse: Arc<dyn Warehouse> = Arc::new(InMemoryWarehouse::new());
        let state: Arc<dyn StateStore> = Arc::new(SledStateStore::open(dir.path()).unwrap());
        let bus = DeltaEventBus::default();
        let engine = MergeEngine::new(warehouse, state, RetryPolicy::default(), bus);

        let (target, staging) = tables();
        let pks = vec!["id".to_string()];
        let cols: Vec<String> = vec![];
        let mode = MergeMode::new(SourceOrdering::Unordered, RowIdSupport(false));
        let cancel = CancellationToken::new();

        let job = MergeJob {
            table: &target,
            staging_table: &staging,
            batch_id: 42,
            mode,
            primary_keys: &pks,
            sort_key_count: 0,
            value_columns: &cols,
            soft_deletes: true,
            max_sequence_in_batch: 3,
        };

        assert_eq!(engine.merge(&job, &cancel).await.unwrap(), 3);
        // A second attempt over the same batch must find the prior job
        // instead of erroring on a duplicate submission.
        assert_eq!(engine.merge(&job, &cancel).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn dry_run_returns_sql_without_submitting_or_advancing_state() {
        let dir = tempdir().unwrap();
        let warehouse: Arc<dyn Warehouse> = Arc::new(InMemoryWarehouse::new());
        let state: Arc<dyn StateStore> = Arc::new(SledStateStore::open(dir.path()).unwrap());
        let bus = DeltaEventBus::default();
        let mut events = bus.subscribe();
        let engine = MergeEngine::new(warehouse.clone(), state.clone(), RetryPolicy::default(), bus);

        let (target, staging) = tables();
        let pks = vec!["id".to_string()];
        let cols = vec!["amount".to_string()];
        let mode = MergeMode::new(SourceOrdering::Ordered, RowIdSupport(true));

        let job = MergeJob {
            table: &target,
            staging_table: &staging,
            batch_id: 55,
            mode,
            primary_keys: &pks,
            sort_key_count: 0,
            value_columns: &cols,
            soft_deletes: false,
            max_sequence_in_batch: 9,
        };

        let report = engine.dry_run(&job).await.unwrap();
        assert_eq!(report.batch_id, 55);
        assert_eq!(report.latest_merged, 0);
        assert!(report.generated_sql.to_uppercase().contains("MERGE"));
        assert!(report.generated_sql.contains(&staging.table));

        // No job was submitted and no watermark moved.
        assert!(state.get_sequence_counters(&target).await.unwrap().is_none());
        assert!(events.try_recv().is_err());
    }
}
