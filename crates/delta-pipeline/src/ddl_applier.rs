use delta_connectors::{Warehouse, WarehouseError};
use delta_core::{DeltaError, DeltaFailure, RetryDisposition, RetryError, RetryPolicy, StateStore};
use delta_model::{
    table::supplementary_columns as col, ColumnSchema, DataType, DdlEvent, DdlOperation, TableId, TableSchema,
    TargetTableState,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::events::{DeltaEvent, DeltaEventBus};

/// Adds the bookkeeping columns every target table carries to a freshly-seen
/// source schema before it reaches the warehouse.
fn augmented_schema(schema: &TableSchema) -> TableSchema {
    let mut columns = schema.columns.clone();
    columns.push(ColumnSchema::new(col::SEQUENCE_NUM, DataType::Int64, false));
    columns.push(ColumnSchema::new(col::SOURCE_TIMESTAMP, DataType::Timestamp, true));
    columns.push(ColumnSchema::new(col::ROW_ID, DataType::String, true));
    columns.push(ColumnSchema::new(col::IS_DELETED, DataType::Bool, true));
    TableSchema::new(columns)
}

fn classify(err: &DeltaError) -> RetryDisposition {
    if err.is_transient() {
        RetryDisposition::Retry
    } else {
        RetryDisposition::Stop
    }
}

/// Applies DDL events against the warehouse, retrying transient failures
/// and publishing `DdlApplied` on success. The batch writer must have
/// sealed any open shard for the table before a DDL event reaches here,
/// since a new column added mid-shard would otherwise split one blob
/// across two schema fingerprints.
pub struct DdlApplier {
    warehouse: Arc<dyn Warehouse>,
    state: Arc<dyn StateStore>,
    retry: RetryPolicy,
    bus: DeltaEventBus,
}

impl DdlApplier {
    pub fn new(warehouse: Arc<dyn Warehouse>, state: Arc<dyn StateStore>, retry: RetryPolicy, bus: DeltaEventBus) -> Self {
        Self { warehouse, state, retry, bus }
    }

    pub async fn apply(
        &self,
        table: &TableId,
        event: &DdlEvent,
        cancel: &CancellationToken,
    ) -> Result<(), DeltaFailure> {
        let result = self
            .retry
            .run(cancel, || self.apply_once(table, event), classify)
            .await;

        match result {
            Ok(()) => {
                self.bus.publish(DeltaEvent::DdlApplied {
                    table: table.clone(),
                    operation: event.operation,
                });
                Ok(())
            }
            Err(RetryError::Fatal(e)) => Err(e.into()),
            Err(RetryError::AttemptsExceeded(e)) => Err(DeltaFailure::RetriesExhausted(e.to_string())),
            Err(RetryError::Cancelled) => Err(DeltaError::Cancelled.into()),
        }
    }

    async fn apply_once(&self, table: &TableId, event: &DdlEvent) -> Result<(), DeltaError> {
        match event.operation {
            DdlOperation::CreateDatabase => {
                self.warehouse.create_dataset(&event.database).await?;
            }
            DdlOperation::DropDatabase => {
                self.warehouse.drop_dataset(&event.database).await?;
            }
            DdlOperation::CreateTable => {
                if self.state.get_direct_load_flag(table).await? {
                    // A prior snapshot direct-load never cleared its flag
                    // (crash mid-load); the target may hold a partial copy.
                    if self.warehouse.get_table_schema(table).await?.is_some() {
                        self.warehouse.drop_table(table).await?;
                    }
                    self.state.set_direct_load_flag(table, false).await?;
                }

                self.state
                    .put_table_state(table, &TargetTableState::new(event.primary_key.clone(), table)?)
                    .await?;

                self.warehouse.create_dataset(&table.dataset).await?;
                if self.warehouse.get_table_schema(table).await?.is_none() {
                    self.warehouse
                        .create_table(table, &augmented_schema(&event.schema), &event.primary_key)
                        .await?;
                }
            }
            DdlOperation::DropTable => {
                self.warehouse.drop_table(table).await?;
            }
            DdlOperation::TruncateTable => match self.warehouse.truncate_table(table).await {
                Ok(()) => {}
                Err(WarehouseError::TableNotFound(_)) => {
                    warn!(%table, "truncate of a table the warehouse has never seen, treating as no-op");
                }
                Err(e) => return Err(e.into()),
            },
            DdlOperation::RenameTable => {
                warn!(%table, new_name = %event.table, "rename table is not supported, skipping");
            }
            DdlOperation::AlterTable => self.apply_alter(table, event).await?,
        }
        Ok(())
    }

    async fn apply_alter(&self, table: &TableId, event: &DdlEvent) -> Result<(), DeltaError> {
        let existing = self.warehouse.get_table_schema(table).await?;
        for column in &event.schema.columns {
            let already_present = existing
                .as_ref()
                .map(|s| s.column(&column.name).is_some())
                .unwrap_or(false);
            if !already_present {
                self.warehouse.add_column(table, column).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_connectors::InMemoryWarehouse;
    use delta_core::SledStateStore;
    use delta_model::{ColumnSchema, DataType, Offset, TableSchema};
    use tempfile::tempdir;

    fn table() -> TableId {
        TableId::new("p", "d", "orders")
    }

    fn ddl(op: DdlOperation, schema: TableSchema, primary_key: Vec<String>) -> DdlEvent {
        DdlEvent {
            operation: op,
            database: "d".to_string(),
            table: "orders".to_string(),
            prev_table: None,
            schema,
            primary_key,
            snapshot: false,
            offset: Offset(vec![]),
            sequence_number: 1,
        }
    }

    fn applier() -> (DdlApplier, Arc<InMemoryWarehouse>, tempfile::TempDir) {
        let wh = Arc::new(InMemoryWarehouse::new());
        let dir = tempdir().unwrap();
        let state: Arc<dyn StateStore> = Arc::new(SledStateStore::open(dir.path()).unwrap());
        let applier = DdlApplier::new(wh.clone(), state, RetryPolicy::default(), DeltaEventBus::default());
        (applier, wh, dir)
    }

    #[tokio::test]
    async fn create_table_then_alter_adds_new_column() {
        let (applier, wh, _dir) = applier();
        let cancel = CancellationToken::new();

        let schema = TableSchema::new(vec![ColumnSchema::new("id", DataType::Int64, false)]);
        applier
            .apply(&table(), &ddl(DdlOperation::CreateTable, schema, vec!["id".to_string()]), &cancel)
            .await
            .unwrap();

        let mut altered = TableSchema::new(vec![ColumnSchema::new("id", DataType::Int64, false)]);
        altered.columns.push(ColumnSchema::new("amount", DataType::Numeric, true));
        applier
            .apply(&table(), &ddl(DdlOperation::AlterTable, altered, vec!["id".to_string()]), &cancel)
            .await
            .unwrap();

        let got = wh.get_table_schema(&table()).await.unwrap().unwrap();
        assert!(got.column("id").is_some());
        assert!(got.column("amount").is_some());
        assert!(got.column(col::SEQUENCE_NUM).is_some());
        assert!(got.column(col::ROW_ID).is_some());
    }

    #[tokio::test]
    async fn create_table_augments_schema_with_supplementary_columns() {
        let (applier, wh, _dir) = applier();
        let cancel = CancellationToken::new();

        let schema = TableSchema::new(vec![ColumnSchema::new("id", DataType::Int64, false)]);
        applier
            .apply(&table(), &ddl(DdlOperation::CreateTable, schema, vec!["id".to_string()]), &cancel)
            .await
            .unwrap();

        let got = wh.get_table_schema(&table()).await.unwrap().unwrap();
        assert_eq!(got.columns.len(), 5);
    }

    #[tokio::test]
    async fn create_table_is_idempotent_and_does_not_clobber_existing_columns() {
        let (applier, wh, _dir) = applier();
        let cancel = CancellationToken::new();

        let schema = TableSchema::new(vec![ColumnSchema::new("id", DataType::Int64, false)]);
        applier
            .apply(&table(), &ddl(DdlOperation::CreateTable, schema.clone(), vec!["id".to_string()]), &cancel)
            .await
            .unwrap();
        applier
            .apply(&table(), &ddl(DdlOperation::CreateTable, schema, vec!["id".to_string()]), &cancel)
            .await
            .unwrap();

        let got = wh.get_table_schema(&table()).await.unwrap().unwrap();
        assert_eq!(got.columns.len(), 5);
    }

    #[tokio::test]
    async fn truncate_of_unseen_table_is_a_no_op() {
        let (applier, _wh, _dir) = applier();
        let cancel = CancellationToken::new();
        let result = applier
            .apply(&table(), &ddl(DdlOperation::TruncateTable, TableSchema::default(), vec![]), &cancel)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rename_table_is_logged_and_skipped() {
        let (applier, wh, _dir) = applier();
        let cancel = CancellationToken::new();
        let schema = TableSchema::new(vec![ColumnSchema::new("id", DataType::Int64, false)]);
        applier
            .apply(&table(), &ddl(DdlOperation::CreateTable, schema.clone(), vec!["id".to_string()]), &cancel)
            .await
            .unwrap();

        let mut rename = ddl(DdlOperation::RenameTable, schema, vec!["id".to_string()]);
        rename.prev_table = Some("orders".to_string());
        rename.table = "orders_v2".to_string();
        applier.apply(&table(), &rename, &cancel).await.unwrap();

        // The table under its original name is untouched, and no table was
        // ever created under the new name.
        assert!(wh.get_table_schema(&table()).await.unwrap().is_some());
        let mut renamed_target = table();
        renamed_target.table = "orders_v2".to_string();
        assert!(wh.get_table_schema(&renamed_target).await.unwrap().is_none());
    }
}
