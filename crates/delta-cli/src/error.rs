use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("failed to parse pipeline config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to parse change event on line {line}: {source}")]
    EventParse { line: usize, source: serde_json::Error },

    #[error("failed to open the state store: {0}")]
    StateStore(#[from] delta_core::StateStoreError),

    #[error("orchestrator error: {0}")]
    Runtime(#[from] delta_runtime::RuntimeError),

    #[error("warehouse error: {0}")]
    Warehouse(#[from] delta_connectors::WarehouseError),

    #[error("blob store error: {0}")]
    BlobStore(#[from] delta_connectors::BlobStoreError),

    #[error("failed to serialize output as JSON: {0}")]
    JsonSerialize(serde_json::Error),

    #[error("shutdown requested")]
    ShutdownRequested,
}
