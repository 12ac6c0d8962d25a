use delta_model::{ColumnSchema, DataType, RowIdSupport, SourceOrdering, TableId};
use delta_runtime::{OrchestratorConfig, TableRuntimeConfig};
use serde::Deserialize;
use std::time::Duration;

/// On-disk pipeline configuration, read from a TOML file. Parsing a config
/// file into runtime types is a CLI-only concern; the orchestrator itself
/// takes already-constructed `TableRuntimeConfig`s.
#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_bucket")]
    pub blob_bucket: String,
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,
    #[serde(default = "default_max_concurrent_flushes")]
    pub max_concurrent_flushes: usize,
    pub tables: Vec<TableConfig>,
}

fn default_app_name() -> String {
    "delta".to_string()
}

fn default_bucket() -> String {
    "delta-staging".to_string()
}

fn default_flush_interval_seconds() -> u64 {
    30
}

fn default_max_concurrent_flushes() -> usize {
    8
}

#[derive(Debug, Deserialize)]
pub struct TableConfig {
    pub project: String,
    pub dataset: String,
    pub table: String,
    pub primary_keys: Vec<String>,
    pub columns: Vec<ColumnConfig>,
    pub ordering: SourceOrderingConfig,
    #[serde(default)]
    pub row_id_supported: bool,
    #[serde(default)]
    pub soft_deletes: bool,
}

#[derive(Debug, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrderingConfig {
    Ordered,
    Unordered,
}

impl From<SourceOrderingConfig> for SourceOrdering {
    fn from(value: SourceOrderingConfig) -> Self {
        match value {
            SourceOrderingConfig::Ordered => SourceOrdering::Ordered,
            SourceOrderingConfig::Unordered => SourceOrdering::Unordered,
        }
    }
}

impl TableConfig {
    pub fn table_id(&self) -> TableId {
        TableId::new(self.project.clone(), self.dataset.clone(), self.table.clone())
    }

    pub fn staging_table_id(&self) -> TableId {
        TableId::new(
            self.project.clone(),
            self.dataset.clone(),
            self.table_id().staging_table_name("stg_"),
        )
    }

    pub fn schema(&self) -> delta_model::TableSchema {
        delta_model::TableSchema::new(
            self.columns
                .iter()
                .map(|c| ColumnSchema::new(c.name.clone(), c.data_type, c.nullable))
                .collect(),
        )
    }

    pub fn runtime_config(&self) -> TableRuntimeConfig {
        TableRuntimeConfig {
            staging_table: self.staging_table_id(),
            mode: delta_model::MergeMode::new(self.ordering.into(), RowIdSupport(self.row_id_supported)),
            soft_deletes: self.soft_deletes,
        }
    }
}

impl PipelineConfig {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            blob_bucket: self.blob_bucket.clone(),
            app_name: self.app_name.clone(),
            flush_interval: Duration::from_secs(self.flush_interval_seconds),
            max_concurrent_flushes: self.max_concurrent_flushes,
        }
    }
}
