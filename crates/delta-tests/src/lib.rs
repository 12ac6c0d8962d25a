//! Cross-crate harness wiring the in-memory reference connectors into a
//! `ConsumerOrchestrator`, for integration tests exercising the full
//! write -> load -> merge path without a real warehouse.

use delta_connectors::{BlobStore, InMemoryBlobStore, InMemoryWarehouse, Warehouse};
use delta_core::{SledStateStore, StateStore};
use delta_model::{
    ChangeEvent, ColumnSchema, DataType, DmlEvent, DmlOperation, Offset, TableId, TableSchema, Value,
};
use delta_runtime::{ConsumerOrchestrator, OrchestratorConfig, TableRuntimeConfig};
use std::sync::Arc;
use tempfile::TempDir;

pub mod scenarios;

pub struct Harness {
    pub orchestrator: ConsumerOrchestrator,
    pub warehouse: Arc<dyn Warehouse>,
    pub state: Arc<dyn StateStore>,
    pub table: TableId,
    pub staging: TableId,
    // Keeps the sled directory alive for the harness's lifetime.
    _state_dir: TempDir,
}

pub fn orders_schema() -> TableSchema {
    TableSchema::new(vec![
        ColumnSchema::new("id", DataType::Int64, false),
        ColumnSchema::new("amount", DataType::Numeric, true),
    ])
}

pub async fn harness(config: TableRuntimeConfig) -> Harness {
    let table = TableId::new("p", "analytics", "orders");
    let staging = config.staging_table.clone();

    let warehouse: Arc<dyn Warehouse> = Arc::new(InMemoryWarehouse::new());
    let blob_store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
    blob_store.create_bucket("delta-staging").await.unwrap();

    let state_dir = TempDir::new().unwrap();
    let state: Arc<dyn StateStore> = Arc::new(SledStateStore::open(state_dir.path()).unwrap());

    warehouse.create_table(&table, &orders_schema(), &["id".to_string()]).await.unwrap();
    warehouse.create_table(&staging, &orders_schema(), &["id".to_string()]).await.unwrap();

    let orchestrator = ConsumerOrchestrator::new(
        warehouse.clone(),
        blob_store,
        state.clone(),
        OrchestratorConfig {
            max_concurrent_flushes: 2,
            ..OrchestratorConfig::default()
        },
    );
    orchestrator
        .register_table(table.clone(), orders_schema(), vec!["id".to_string()], config)
        .await;

    Harness {
        orchestrator,
        warehouse,
        state,
        table,
        staging,
        _state_dir: state_dir,
    }
}

pub fn staging_table() -> TableId {
    TableId::new("p", "analytics", "orders_staging")
}

pub fn dml(op: DmlOperation, seq: u64, id: i64, row_id: Option<&str>, source_timestamp: Option<i64>) -> ChangeEvent {
    ChangeEvent::Dml(DmlEvent {
        operation: op,
        database: "d".to_string(),
        table: "orders".to_string(),
        after: vec![
            ("id".to_string(), Value::Int64(id)),
            ("amount".to_string(), Value::Numeric(seq.into())),
        ],
        before_pk: None,
        row_id: row_id.map(|s| s.to_string()),
        source_timestamp,
        sort_keys: None,
        snapshot: false,
        offset: Offset(vec![]),
        sequence_number: seq,
    })
}

pub fn insert(seq: u64, id: i64) -> ChangeEvent {
    dml(DmlOperation::Insert, seq, id, None, None)
}

pub fn update(seq: u64, id: i64) -> ChangeEvent {
    dml(DmlOperation::Update, seq, id, None, None)
}

pub fn delete(seq: u64, id: i64) -> ChangeEvent {
    dml(DmlOperation::Delete, seq, id, None, None)
}
