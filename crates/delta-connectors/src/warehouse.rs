use crate::error::WarehouseError;
use async_trait::async_trait;
use delta_model::{BlobFormat, ColumnSchema, TableId, TableSchema};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
}

#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: String,
}

/// Describes a batch load from a blob into a staging table.
pub struct LoadJobSpec<'a> {
    pub job_id: String,
    pub staging_table: &'a TableId,
    pub source_uri: &'a str,
    pub format: BlobFormat,
    pub schema: &'a TableSchema,
}

/// The warehouse boundary: dataset/table DDL plus idempotent job submission.
/// `job_id` is always caller-supplied and deterministic (derived from
/// `(table, batchId, attempt)`), so `find_job` lets the retry coordinator
/// recover a prior attempt's outcome instead of resubmitting blindly.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn create_dataset(&self, dataset: &str) -> Result<(), WarehouseError>;
    async fn drop_dataset(&self, dataset: &str) -> Result<(), WarehouseError>;

    async fn create_table(
        &self,
        table: &TableId,
        schema: &TableSchema,
        primary_keys: &[String],
    ) -> Result<(), WarehouseError>;
    async fn get_table_schema(&self, table: &TableId) -> Result<Option<TableSchema>, WarehouseError>;
    async fn add_column(&self, table: &TableId, column: &ColumnSchema) -> Result<(), WarehouseError>;
    async fn drop_table(&self, table: &TableId) -> Result<(), WarehouseError>;
    async fn truncate_table(&self, table: &TableId) -> Result<(), WarehouseError>;
    async fn rename_table(&self, table: &TableId, new_name: &str) -> Result<(), WarehouseError>;

    async fn submit_load_job(&self, spec: LoadJobSpec<'_>) -> Result<JobHandle, WarehouseError>;
    async fn submit_query_job(&self, job_id: &str, sql: &str) -> Result<JobHandle, WarehouseError>;
    async fn poll_job(&self, job: &JobHandle) -> Result<JobStatus, WarehouseError>;
    async fn find_job(&self, job_id: &str) -> Result<Option<JobHandle>, WarehouseError>;
}

struct TableState {
    schema: TableSchema,
    rows: Vec<serde_json::Value>,
}

/// In-process reference implementation backing the bundled demo and tests.
/// Jobs resolve synchronously (`poll_job` always reports `Succeeded`), since
/// there is no real asynchronous backend to poll against.
#[derive(Default)]
pub struct InMemoryWarehouse {
    datasets: Mutex<std::collections::HashSet<String>>,
    tables: Mutex<HashMap<String, TableState>>,
    jobs: Mutex<HashMap<String, JobStatus>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(table: &TableId) -> String {
        format!("{}.{}.{}", table.project, table.dataset, table.table)
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn create_dataset(&self, dataset: &str) -> Result<(), WarehouseError> {
        self.datasets.lock().unwrap().insert(dataset.to_string());
        Ok(())
    }

    async fn drop_dataset(&self, dataset: &str) -> Result<(), WarehouseError> {
        self.datasets.lock().unwrap().remove(dataset);
        let mut tables = self.tables.lock().unwrap();
        tables.retain(|k, _| !k.split('.').nth(1).map(|d| d == dataset).unwrap_or(false));
        Ok(())
    }

    async fn create_table(
        &self,
        table: &TableId,
        schema: &TableSchema,
        _primary_keys: &[String],
    ) -> Result<(), WarehouseError> {
        self.tables
            .lock()
            .unwrap()
            .entry(Self::key(table))
            .or_insert_with(|| TableState {
                schema: schema.clone(),
                rows: Vec::new(),
            });
        Ok(())
    }

    async fn get_table_schema(&self, table: &TableId) -> Result<Option<TableSchema>, WarehouseError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(&Self::key(table))
            .map(|t| t.schema.clone()))
    }

    async fn add_column(&self, table: &TableId, column: &ColumnSchema) -> Result<(), WarehouseError> {
        let mut tables = self.tables.lock().unwrap();
        let state = tables
            .get_mut(&Self::key(table))
            .ok_or_else(|| WarehouseError::TableNotFound(table.to_string()))?;
        if state.schema.column(&column.name).is_none() {
            state.schema.columns.push(column.clone());
        }
        Ok(())
    }

    async fn drop_table(&self, table: &TableId) -> Result<(), WarehouseError> {
        self.tables.lock().unwrap().remove(&Self::key(table));
        Ok(())
    }

    async fn truncate_table(&self, table: &TableId) -> Result<(), WarehouseError> {
        if let Some(state) = self.tables.lock().unwrap().get_mut(&Self::key(table)) {
            state.rows.clear();
        }
        Ok(())
    }

    async fn rename_table(&self, table: &TableId, new_name: &str) -> Result<(), WarehouseError> {
        let mut tables = self.tables.lock().unwrap();
        let old_key = Self::key(table);
        let state = tables
            .remove(&old_key)
            .ok_or_else(|| WarehouseError::TableNotFound(table.to_string()))?;
        let mut renamed = table.clone();
        renamed.table = new_name.to_string();
        tables.insert(Self::key(&renamed), state);
        Ok(())
    }

    async fn submit_load_job(&self, spec: LoadJobSpec<'_>) -> Result<JobHandle, WarehouseError> {
        self.jobs
            .lock()
            .unwrap()
            .insert(spec.job_id.clone(), JobStatus::Succeeded);
        Ok(JobHandle { job_id: spec.job_id })
    }

    async fn submit_query_job(&self, job_id: &str, _sql: &str) -> Result<JobHandle, WarehouseError> {
        self.jobs
            .lock()
            .unwrap()
            .insert(job_id.to_string(), JobStatus::Succeeded);
        Ok(JobHandle {
            job_id: job_id.to_string(),
        })
    }

    async fn poll_job(&self, job: &JobHandle) -> Result<JobStatus, WarehouseError> {
        self.jobs
            .lock()
            .unwrap()
            .get(&job.job_id)
            .copied()
            .ok_or_else(|| WarehouseError::JobNotFound(job.job_id.clone()))
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<JobHandle>, WarehouseError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .get(job_id)
            .map(|_| JobHandle {
                job_id: job_id.to_string(),
            }))
    }
}

/// Production adapter over BigQuery.
pub struct BigQueryWarehouse {
    client: google_cloud_bigquery::client::Client,
    project: String,
}

impl BigQueryWarehouse {
    pub fn new(client: google_cloud_bigquery::client::Client, project: impl Into<String>) -> Self {
        Self {
            client,
            project: project.into(),
        }
    }
}

/// Maps a BigQuery-reported field type to the warehouse-representable
/// subset of `DataType` we track. Types BigQuery can return but we never
/// generate (`Geography`, `Json`, `Range`, ...) fall back to `String`
/// rather than erroring, since a target table's schema can carry columns
/// this core never wrote (added by hand, or by a different writer).
fn data_type_from_bigquery(field_type: &google_cloud_bigquery::table::TableFieldType) -> DataType {
    use google_cloud_bigquery::table::TableFieldType;
    match field_type {
        TableFieldType::Integer => DataType::Int64,
        TableFieldType::Float => DataType::Float64,
        TableFieldType::Numeric | TableFieldType::Bignumeric => DataType::Numeric,
        TableFieldType::Boolean => DataType::Bool,
        TableFieldType::Bytes => DataType::Bytes,
        TableFieldType::Date => DataType::Date,
        TableFieldType::Timestamp | TableFieldType::Datetime | TableFieldType::Time => DataType::Timestamp,
        TableFieldType::Record => DataType::Struct,
        _ => DataType::String,
    }
}

fn table_schema_from_bigquery(meta: &google_cloud_bigquery::table::Table) -> TableSchema {
    use google_cloud_bigquery::table::Mode;

    let fields = meta
        .schema
        .as_ref()
        .and_then(|s| s.fields.as_ref())
        .cloned()
        .unwrap_or_default();

    let columns = fields
        .into_iter()
        .map(|f| {
            let nullable = !matches!(f.mode, Some(Mode::Required));
            ColumnSchema::new(f.name, data_type_from_bigquery(&f.r#type), nullable)
        })
        .collect();

    TableSchema::new(columns)
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn create_dataset(&self, dataset: &str) -> Result<(), WarehouseError> {
        use google_cloud_bigquery::dataset::{Dataset, DatasetReference};

        let req = Dataset {
            dataset_reference: DatasetReference {
                project_id: self.project.clone(),
                dataset_id: dataset.to_string(),
            },
            ..Default::default()
        };
        match self.client.dataset().create(&req).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("409") => Ok(()),
            Err(e) => Err(WarehouseError::Transport(e.to_string())),
        }
    }

    async fn drop_dataset(&self, dataset: &str) -> Result<(), WarehouseError> {
        self.client
            .dataset()
            .delete(&self.project, dataset, true)
            .await
            .map_err(|e| WarehouseError::Transport(e.to_string()))
    }

    async fn create_table(
        &self,
        table: &TableId,
        schema: &TableSchema,
        primary_keys: &[String],
    ) -> Result<(), WarehouseError> {
        use delta_planner::ast::common::TableRef;
        use delta_planner::ddl::{render_create_table, DEFAULT_MAX_CLUSTERING_COLUMNS};
        use delta_planner::dialect::BigQuery;

        let table_ref = TableRef::new(table.dataset.clone(), table.table.clone());
        let sql = render_create_table(&BigQuery, &table_ref, schema, primary_keys, DEFAULT_MAX_CLUSTERING_COLUMNS);
        self.submit_query_job(&format!("create-{}", table), &sql).await?;
        Ok(())
    }

    async fn get_table_schema(&self, table: &TableId) -> Result<Option<TableSchema>, WarehouseError> {
        match self
            .client
            .table()
            .get(&table.project, &table.dataset, &table.table)
            .await
        {
            Ok(meta) => Ok(Some(table_schema_from_bigquery(&meta))),
            Err(e) if e.to_string().contains("404") => Ok(None),
            Err(e) => Err(WarehouseError::Transport(e.to_string())),
        }
    }

    async fn add_column(&self, table: &TableId, column: &ColumnSchema) -> Result<(), WarehouseError> {
        use delta_planner::ast::common::TableRef;
        use delta_planner::ddl::render_add_column;
        use delta_planner::dialect::BigQuery;

        let table_ref = TableRef::new(table.dataset.clone(), table.table.clone());
        let sql = render_add_column(&BigQuery, &table_ref, column);
        self.submit_query_job(&format!("addcol-{}-{}", table, column.name), &sql)
            .await?;
        Ok(())
    }

    async fn drop_table(&self, table: &TableId) -> Result<(), WarehouseError> {
        self.client
            .table()
            .delete(&table.project, &table.dataset, &table.table)
            .await
            .map_err(|e| WarehouseError::Transport(e.to_string()))
    }

    async fn truncate_table(&self, table: &TableId) -> Result<(), WarehouseError> {
        let sql = format!("TRUNCATE TABLE `{}`.`{}`.`{}`", table.project, table.dataset, table.table);
        self.submit_query_job(&format!("truncate-{}", table), &sql).await?;
        Ok(())
    }

    async fn rename_table(&self, table: &TableId, new_name: &str) -> Result<(), WarehouseError> {
        let sql = format!(
            "ALTER TABLE `{}`.`{}`.`{}` RENAME TO `{}`",
            table.project, table.dataset, table.table, new_name
        );
        self.submit_query_job(&format!("rename-{}", table), &sql).await?;
        Ok(())
    }

    async fn submit_load_job(&self, spec: LoadJobSpec<'_>) -> Result<JobHandle, WarehouseError> {
        use google_cloud_bigquery::job::{Job, JobConfiguration, JobConfigurationLoad, JobReference};

        let job = Job {
            job_reference: Some(JobReference {
                project_id: self.project.clone(),
                job_id: spec.job_id.clone(),
                ..Default::default()
            }),
            configuration: Some(JobConfiguration {
                load: Some(JobConfigurationLoad {
                    source_uris: vec![spec.source_uri.to_string()],
                    destination_table: Some(google_cloud_bigquery::table::TableReference {
                        project_id: self.project.clone(),
                        dataset_id: spec.staging_table.dataset.clone(),
                        table_id: spec.staging_table.table.clone(),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.client
            .job()
            .create(&self.project, &job)
            .await
            .map_err(|e| WarehouseError::Transport(e.to_string()))?;
        Ok(JobHandle { job_id: spec.job_id })
    }

    async fn submit_query_job(&self, job_id: &str, sql: &str) -> Result<JobHandle, WarehouseError> {
        use google_cloud_bigquery::job::{Job, JobConfiguration, JobConfigurationQuery, JobReference};

        let job = Job {
            job_reference: Some(JobReference {
                project_id: self.project.clone(),
                job_id: job_id.to_string(),
                ..Default::default()
            }),
            configuration: Some(JobConfiguration {
                query: Some(JobConfigurationQuery {
                    query: sql.to_string(),
                    use_legacy_sql: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.client
            .job()
            .create(&self.project, &job)
            .await
            .map_err(|e| WarehouseError::Transport(e.to_string()))?;
        Ok(JobHandle {
            job_id: job_id.to_string(),
        })
    }

    async fn poll_job(&self, job: &JobHandle) -> Result<JobStatus, WarehouseError> {
        let status = self
            .client
            .job()
            .get(&self.project, &job.job_id)
            .await
            .map_err(|e| WarehouseError::Transport(e.to_string()))?;
        if status.is_done() {
            Ok(JobStatus::Succeeded)
        } else {
            Ok(JobStatus::Running)
        }
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<JobHandle>, WarehouseError> {
        match self.client.job().get(&self.project, job_id).await {
            Ok(_) => Ok(Some(JobHandle {
                job_id: job_id.to_string(),
            })),
            Err(e) if e.to_string().contains("404") => Ok(None),
            Err(e) => Err(WarehouseError::Transport(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_model::DataType;

    fn table() -> TableId {
        TableId::new("proj", "analytics", "orders")
    }

    #[tokio::test]
    async fn create_then_get_schema_round_trips() {
        let wh = InMemoryWarehouse::new();
        let schema = TableSchema::new(vec![ColumnSchema::new("id", DataType::Int64, false)]);
        wh.create_table(&table(), &schema, &["id".to_string()]).await.unwrap();
        let got = wh.get_table_schema(&table()).await.unwrap();
        assert_eq!(got, Some(schema));
    }

    #[tokio::test]
    async fn add_column_is_idempotent() {
        let wh = InMemoryWarehouse::new();
        let schema = TableSchema::new(vec![ColumnSchema::new("id", DataType::Int64, false)]);
        wh.create_table(&table(), &schema, &["id".to_string()]).await.unwrap();
        let col = ColumnSchema::new("amount", DataType::Numeric, true);
        wh.add_column(&table(), &col).await.unwrap();
        wh.add_column(&table(), &col).await.unwrap();
        let got = wh.get_table_schema(&table()).await.unwrap().unwrap();
        assert_eq!(got.columns.len(), 2);
    }

    #[tokio::test]
    async fn find_job_sees_previously_submitted_job() {
        let wh = InMemoryWarehouse::new();
        wh.submit_query_job("job-1", "SELECT 1").await.unwrap();
        assert!(wh.find_job("job-1").await.unwrap().is_some());
        assert!(wh.find_job("job-2").await.unwrap().is_none());
    }
}
