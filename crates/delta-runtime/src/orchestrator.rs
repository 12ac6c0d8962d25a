use delta_connectors::Warehouse;
use delta_core::{DeltaFailure, RetryPolicy, StateStore};
use delta_model::{
    table::supplementary_columns as col, BatchShard, BlobType, ChangeEvent, DdlEvent, MergeMode, TableId,
    TableSchema,
};
use delta_pipeline::{BatchWriter, BatchWriterConfig, BlobWriter, DdlApplier, DeltaEvent, DeltaEventBus, MergeEngine, MergeJob};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::load_stage::LoadStage;
use crate::error::RuntimeError;

/// Per-table metadata the orchestrator needs to flush a batch: which
/// staging table it loads into, the four-variant merge mode its source
/// reports, and whether soft-delete tombstoning applies.
#[derive(Debug, Clone)]
pub struct TableRuntimeConfig {
    pub staging_table: TableId,
    pub mode: MergeMode,
    pub soft_deletes: bool,
}

struct TableMeta {
    config: TableRuntimeConfig,
    schema: TableSchema,
    primary_keys: Vec<String>,
}

impl TableMeta {
    fn value_columns(&self) -> Vec<String> {
        let supplementary = [
            col::SEQUENCE_NUM,
            col::IS_DELETED,
            col::ROW_ID,
            col::SOURCE_TIMESTAMP,
            col::SORT,
            col::OP,
            col::BATCH_ID,
        ];
        self.schema
            .columns
            .iter()
            .map(|c| c.name.clone())
            .filter(|name| !self.primary_keys.contains(name) && !supplementary.contains(&name.as_str()))
            .collect()
    }
}

pub struct OrchestratorConfig {
    pub blob_bucket: String,
    pub app_name: String,
    pub flush_interval: Duration,
    pub max_concurrent_flushes: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            blob_bucket: "delta-staging".to_string(),
            app_name: "delta".to_string(),
            flush_interval: Duration::from_secs(30),
            max_concurrent_flushes: 8,
        }
    }
}

struct Inner {
    batch_writer: BatchWriter,
    blob_writer: BlobWriter,
    load_stage: LoadStage,
    merge_engine: MergeEngine,
    ddl_applier: DdlApplier,
    bus: DeltaEventBus,
    semaphore: Semaphore,
    tables: Mutex<HashMap<TableId, TableMeta>>,
    /// Once any flush fails, every subsequent apply call rethrows this
    /// instead of accepting events the caller believes already failed.
    latch: Mutex<Option<RuntimeError>>,
    flush_interval: Duration,
    state: Arc<dyn StateStore>,
    cancel: CancellationToken,
}

/// Single-writer orchestrator driving one table's events through
/// write -> load -> merge. Batch sealing per table is strictly ordered
/// (guarded by `BatchWriter`'s internal mutex); flushes for *different*
/// tables run concurrently, bounded by `max_concurrent_flushes`.
pub struct ConsumerOrchestrator {
    inner: Arc<Inner>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl ConsumerOrchestrator {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        blob_store: Arc<dyn delta_connectors::BlobStore>,
        state: Arc<dyn StateStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let bus = DeltaEventBus::default();
        let retry = RetryPolicy::default();
        let cancel = CancellationToken::new();

        let inner = Inner {
            batch_writer: BatchWriter::new(BatchWriterConfig {
                max_batch_age: config.flush_interval,
                ..BatchWriterConfig::default()
            }),
            blob_writer: BlobWriter::new(blob_store, config.blob_bucket, config.app_name),
            load_stage: LoadStage::new(warehouse.clone(), state.clone(), retry.clone()),
            merge_engine: MergeEngine::new(warehouse.clone(), state.clone(), retry.clone(), bus.clone()),
            ddl_applier: DdlApplier::new(warehouse, state.clone(), retry, bus.clone()),
            bus,
            semaphore: Semaphore::new(config.max_concurrent_flushes),
            tables: Mutex::new(HashMap::new()),
            latch: Mutex::new(None),
            flush_interval: config.flush_interval,
            state,
            cancel,
        };

        Self {
            inner: Arc::new(inner),
            ticker: Mutex::new(None),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DeltaEvent> {
        self.inner.bus.subscribe()
    }

    pub async fn register_table(&self, table: TableId, schema: TableSchema, primary_keys: Vec<String>, config: TableRuntimeConfig) {
        self.inner.tables.lock().await.insert(
            table,
            TableMeta {
                config,
                schema,
                primary_keys,
            },
        );
    }

    /// Starts the periodic flush ticker that seals and flushes any table
    /// whose open shard has aged past `flush_interval` without reaching the
    /// event-count threshold on its own.
    pub async fn start(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(inner.flush_interval);
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => return,
                    _ = tick.tick() => {
                        let aged = inner.batch_writer.seal_aged(inner.flush_interval).await;
                        for shard in aged {
                            let inner = inner.clone();
                            tokio::spawn(async move {
                                if let Err(e) = flush_shard(&inner, shard.table.clone(), shard).await {
                                    latch_failure(&inner, e).await;
                                }
                            });
                        }
                    }
                }
            }
        });
        *self.ticker.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        if let Some(handle) = self.ticker.lock().await.take() {
            let _ = handle.await;
        }
        let handles: Vec<_> = self.in_flight.lock().await.drain(..).collect();
        for h in handles {
            let _ = h.await;
        }
    }

    async fn check_latch(&self) -> Result<(), RuntimeError> {
        if let Some(err) = self.inner.latch.lock().await.clone() {
            return Err(err);
        }
        Ok(())
    }

    pub async fn apply_dml(&self, table: &TableId, blob_type: BlobType, event: ChangeEvent) -> Result<(), RuntimeError> {
        self.check_latch().await?;

        let schema = {
            let tables = self.inner.tables.lock().await;
            let meta = tables
                .get(table)
                .ok_or_else(|| RuntimeError::UnregisteredTable(table.to_string()))?;
            meta.schema.clone()
        };

        if let Some(shard) = self.inner.batch_writer.append(table, &schema, blob_type, event).await {
            self.spawn_flush(table.clone(), shard).await;
        }
        Ok(())
    }

    /// Force-seals and flushes `table`'s open shard, then applies the DDL.
    /// DDL always waits for the flush it implicitly ends, since the new
    /// schema a DDL event carries must never retroactively apply to rows
    /// already staged under the prior one.
    pub async fn apply_ddl(&self, table: &TableId, event: DdlEvent) -> Result<(), RuntimeError> {
        self.check_latch().await?;

        if let Some(shard) = self.inner.batch_writer.seal(table).await {
            flush_shard(&self.inner, table.clone(), shard)
                .await
                .map_err(|e| latch_error(table, e))?;
        }

        self.inner
            .ddl_applier
            .apply(table, &event, &self.inner.cancel)
            .await
            .map_err(|e| latch_error(table, e))?;

        self.inner
            .state
            .commit_offset(table, &event.offset, event.sequence_number)
            .await
            .map_err(|e| latch_error(table, DeltaFailure::Other(e.to_string())))
    }

    /// Builds and reports the MERGE statement `table` would submit for
    /// `batch_id` against today's `latestMerged` watermark, without
    /// submitting it. Lets an operator inspect the generated SQL before
    /// committing to a run.
    pub async fn dry_run_merge(&self, table: &TableId, batch_id: i64) -> Result<delta_pipeline::MergeDryRunReport, RuntimeError> {
        self.check_latch().await?;

        let (staging_table, mode, soft_deletes, primary_keys, value_columns) = {
            let tables = self.inner.tables.lock().await;
            let meta = tables
                .get(table)
                .ok_or_else(|| RuntimeError::UnregisteredTable(table.to_string()))?;
            (
                meta.config.staging_table.clone(),
                meta.config.mode,
                meta.config.soft_deletes,
                meta.primary_keys.clone(),
                meta.value_columns(),
            )
        };

        let job = MergeJob {
            table,
            staging_table: &staging_table,
            batch_id,
            mode,
            primary_keys: &primary_keys,
            sort_key_count: 0,
            value_columns: &value_columns,
            soft_deletes,
            max_sequence_in_batch: 0,
        };

        self.inner
            .merge_engine
            .dry_run(&job)
            .await
            .map_err(|e| latch_error(table, e))
    }

    async fn spawn_flush(&self, table: TableId, shard: BatchShard) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = flush_shard(&inner, table.clone(), shard).await {
                latch_failure(&inner, latch_error(&table, e)).await;
            }
        });
        self.in_flight.lock().await.push(handle);
    }
}

fn latch_error(table: &TableId, err: DeltaFailure) -> RuntimeError {
    RuntimeError::FlushFailed {
        table: table.to_string(),
        source: err.to_string(),
    }
}

async fn latch_failure(inner: &Inner, err: RuntimeError) {
    error!(error = %err, "orchestrator latched a flush failure");
    *inner.latch.lock().await = Some(err);
}

async fn flush_shard(inner: &Inner, table: TableId, shard: BatchShard) -> Result<(), DeltaFailure> {
    let _permit = inner.semaphore.acquire().await.expect("semaphore never closed");

    inner.bus.publish(DeltaEvent::BatchSealed {
        table: table.clone(),
        batch_id: shard.batch_id,
        num_events: shard.events.len(),
    });

    let max_seq = shard.max_sequence_number().unwrap_or(0);
    let max_offset = shard
        .events
        .iter()
        .max_by_key(|e| e.sequence_number())
        .map(|e| e.offset().clone());
    let batch_id = shard.batch_id;
    let blob_type = shard.blob_type;

    let (staging_table, mode, soft_deletes, primary_keys, value_columns) = {
        let tables = inner.tables.lock().await;
        let meta = tables.get(&table).ok_or_else(|| DeltaFailure::Other(format!("unregistered table {table}")))?;
        (
            meta.config.staging_table.clone(),
            meta.config.mode,
            meta.config.soft_deletes,
            meta.primary_keys.clone(),
            meta.value_columns(),
        )
    };

    let sort_key_count = shard
        .events
        .iter()
        .filter_map(|e| match e {
            ChangeEvent::Dml(d) => d.sort_keys.as_ref().map(|k| k.len()),
            ChangeEvent::Ddl(_) => None,
        })
        .max()
        .unwrap_or(0);

    let blob = inner
        .blob_writer
        .write(&shard, &primary_keys, sort_key_count)
        .await
        .map_err(|e| DeltaFailure::Other(e.to_string()))?;
    inner.bus.publish(DeltaEvent::BlobWritten {
        table: table.clone(),
        batch_id,
        blob_handle: blob.blob_handle.clone(),
    });

    match blob_type {
        BlobType::Snapshot => {
            inner.load_stage.load_direct(&table, &blob, &inner.cancel).await?;
            inner.bus.publish(DeltaEvent::LoadSubmitted {
                table: table.clone(),
                batch_id,
                job_id: format!("direct-{}-{}-{}", table.dataset, table.table, batch_id),
            });
            info!(%table, batch_id, "snapshot batch loaded directly into target");
        }
        BlobType::Streaming => {
            inner.load_stage.load(&staging_table, &blob, &inner.cancel).await?;
            inner.bus.publish(DeltaEvent::LoadSubmitted {
                table: table.clone(),
                batch_id,
                job_id: format!("load-{}-{}-{}", staging_table.dataset, staging_table.table, batch_id),
            });

            let merge_job = MergeJob {
                table: &table,
                staging_table: &staging_table,
                batch_id,
                mode,
                primary_keys: &primary_keys,
                sort_key_count,
                value_columns: &value_columns,
                soft_deletes,
                max_sequence_in_batch: max_seq,
            };

            inner.merge_engine.merge(&merge_job, &inner.cancel).await?;
            info!(%table, batch_id, "batch reconciled");
        }
    }

    if let Some(offset) = max_offset {
        inner
            .state
            .commit_offset(&table, &offset, max_seq)
            .await
            .map_err(|e| DeltaFailure::Other(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_connectors::InMemoryBlobStore;
    use delta_connectors::InMemoryWarehouse;
    use delta_core::SledStateStore;
    use delta_model::{ColumnSchema, DataType, DmlEvent, DmlOperation, Offset, RowIdSupport, SourceOrdering, Value};
    use tempfile::tempdir;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnSchema::new("id", DataType::Int64, false),
            ColumnSchema::new("amount", DataType::Numeric, true),
        ])
    }

    fn dml(seq: u64) -> ChangeEvent {
        ChangeEvent::Dml(DmlEvent {
            operation: DmlOperation::Insert,
            database: "d".to_string(),
            table: "orders".to_string(),
            after: vec![("id".to_string(), Value::Int64(seq as i64))],
            before_pk: None,
            row_id: None,
            source_timestamp: None,
            sort_keys: None,
            snapshot: false,
            offset: Offset(vec![]),
            sequence_number: seq,
        })
    }

    async fn make_orchestrator() -> (ConsumerOrchestrator, TableId) {
        let warehouse: Arc<dyn Warehouse> = Arc::new(InMemoryWarehouse::new());
        let blob_store: Arc<dyn delta_connectors::BlobStore> = Arc::new(InMemoryBlobStore::new());
        blob_store.create_bucket("delta-staging").await.unwrap();
        let dir = tempdir().unwrap();
        let state: Arc<dyn StateStore> = Arc::new(SledStateStore::open(dir.path()).unwrap());

        let orchestrator = ConsumerOrchestrator::new(
            warehouse.clone(),
            blob_store,
            state,
            OrchestratorConfig {
                max_concurrent_flushes: 2,
                ..OrchestratorConfig::default()
            },
        );

        let table = TableId::new("p", "analytics", "orders");
        let staging = TableId::new("p", "analytics", "orders_staging");
        warehouse.create_table(&table, &schema(), &["id".to_string()]).await.unwrap();
        warehouse.create_table(&staging, &schema(), &["id".to_string()]).await.unwrap();

        orchestrator
            .register_table(
                table.clone(),
                schema(),
                vec!["id".to_string()],
                TableRuntimeConfig {
                    staging_table: staging,
                    mode: MergeMode::new(SourceOrdering::Ordered, RowIdSupport(true)),
                    soft_deletes: false,
                },
            )
            .await;

        (orchestrator, table)
    }

    #[tokio::test]
    async fn flushing_a_full_batch_reconciles_without_error() {
        let (orchestrator, table) = make_orchestrator().await;
        let mut events = orchestrator.subscribe();

        for seq in 1..=3 {
            orchestrator.apply_dml(&table, BlobType::Streaming, dml(seq)).await.unwrap();
        }
        let sealed = orchestrator.inner.batch_writer.seal(&table).await;
        assert!(sealed.is_some());
        super::flush_shard(&orchestrator.inner, table.clone(), sealed.unwrap()).await.unwrap();

        let mut saw_merge_completed = false;
        while let Ok(evt) = events.try_recv() {
            if matches!(evt, DeltaEvent::MergeCompleted { .. }) {
                saw_merge_completed = true;
            }
        }
        assert!(saw_merge_completed);
    }

    #[tokio::test]
    async fn flushing_a_snapshot_batch_loads_directly_without_merge() {
        let (orchestrator, table) = make_orchestrator().await;
        let mut events = orchestrator.subscribe();

        orchestrator.apply_dml(&table, BlobType::Snapshot, dml(1)).await.unwrap();
        let sealed = orchestrator.inner.batch_writer.seal(&table).await;
        assert!(sealed.is_some());
        super::flush_shard(&orchestrator.inner, table.clone(), sealed.unwrap()).await.unwrap();

        let mut saw_merge_submitted = false;
        let mut saw_load_submitted = false;
        while let Ok(evt) = events.try_recv() {
            match evt {
                DeltaEvent::MergeSubmitted { .. } | DeltaEvent::MergeCompleted { .. } => saw_merge_submitted = true,
                DeltaEvent::LoadSubmitted { job_id, .. } if job_id.starts_with("direct-") => saw_load_submitted = true,
                _ => {}
            }
        }
        assert!(saw_load_submitted);
        assert!(!saw_merge_submitted);

        let committed = orchestrator.inner.state.get_committed_offset(&table).await.unwrap();
        assert_eq!(committed.unwrap().sequence_number, 1);
    }

    #[tokio::test]
    async fn apply_dml_on_unregistered_table_errors_without_panicking() {
        let (orchestrator, _table) = make_orchestrator().await;
        let other = TableId::new("p", "analytics", "unknown");
        let result = orchestrator.apply_dml(&other, BlobType::Streaming, dml(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dry_run_merge_reports_sql_without_advancing_state() {
        let (orchestrator, table) = make_orchestrator().await;
        let mut events = orchestrator.subscribe();

        let report = orchestrator.dry_run_merge(&table, 1700000000000).await.unwrap();
        assert_eq!(report.table, table);
        assert_eq!(report.latest_merged, 0);
        assert!(report.generated_sql.to_uppercase().contains("MERGE"));

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn dry_run_merge_on_unregistered_table_errors() {
        let (orchestrator, _table) = make_orchestrator().await;
        let other = TableId::new("p", "analytics", "unknown");
        let result = orchestrator.dry_run_merge(&other, 1).await;
        assert!(result.is_err());
    }
}
