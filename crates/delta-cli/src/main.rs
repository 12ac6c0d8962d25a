use crate::{commands::Commands, error::CliError, shutdown::ShutdownCoordinator};
use clap::Parser;
use delta_connectors::{BlobStore, InMemoryBlobStore, InMemoryWarehouse, Warehouse};
use delta_core::{SledStateStore, StateStore};
use delta_model::ChangeEvent;
use delta_runtime::ConsumerOrchestrator;
use std::{process, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

mod commands;
mod config;
mod error;
mod replay;
mod shutdown;

#[derive(Parser)]
#[command(name = "delta", version = "0.1.0", about = "CDC merge pipeline demo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let exit_code = match run_cli().await {
        Ok(()) => 0,
        Err(CliError::ShutdownRequested) => {
            info!("shut down gracefully");
            130
        }
        Err(e) => {
            tracing::error!("{e}");
            1
        }
    };

    process::exit(exit_code);
}

async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    let shutdown = ShutdownCoordinator::new(cancel.clone());
    shutdown.register_handlers();

    match cli.command {
        Commands::Run { config, events, state_dir } => run_pipeline(&config, &events, &state_dir, &shutdown).await,
        Commands::DryRun { config, state_dir, project, dataset, table, batch_id } => {
            show_dry_run(&config, &state_dir, &project, &dataset, &table, batch_id).await
        }
        Commands::Progress { state_dir, project, dataset, table, json } => {
            show_progress(&state_dir, &project, &dataset, &table, json).await
        }
    }
}

async fn run_pipeline(
    config_path: &str,
    events_path: &str,
    state_dir: &str,
    shutdown: &ShutdownCoordinator,
) -> Result<(), CliError> {
    let raw = tokio::fs::read_to_string(config_path)
        .await
        .map_err(|source| CliError::Read { path: config_path.to_string(), source })?;
    let pipeline: config::PipelineConfig = toml::from_str(&raw)?;

    let warehouse: Arc<dyn Warehouse> = Arc::new(InMemoryWarehouse::new());
    let blob_store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
    blob_store.create_bucket(&pipeline.blob_bucket).await?;
    let state: Arc<dyn StateStore> = Arc::new(SledStateStore::open(state_dir)?);

    let orchestrator = ConsumerOrchestrator::new(warehouse.clone(), blob_store, state, pipeline.orchestrator_config());

    for table in &pipeline.tables {
        let table_id = table.table_id();
        let staging_id = table.staging_table_id();
        warehouse.create_dataset(&table.dataset).await?;
        warehouse.create_table(&table_id, &table.schema(), &table.primary_keys).await?;
        warehouse.create_table(&staging_id, &table.schema(), &table.primary_keys).await?;
        orchestrator
            .register_table(table_id, table.schema(), table.primary_keys.clone(), table.runtime_config())
            .await;
    }

    orchestrator.start().await;

    let events = replay::read_events(events_path).await?;
    info!(count = events.len(), "replaying events");

    for event in events {
        if shutdown.is_shutdown_requested() {
            break;
        }
        let table = pipeline
            .tables
            .iter()
            .find(|t| t.table == event.table())
            .map(|t| t.table_id())
            .ok_or_else(|| CliError::Runtime(delta_runtime::RuntimeError::UnregisteredTable(event.table().clone())))?;

        match event {
            ChangeEvent::Dml(dml) => {
                orchestrator.apply_dml(&table, replay::REPLAY_BLOB_TYPE, ChangeEvent::Dml(dml)).await?;
            }
            ChangeEvent::Ddl(ddl) => {
                orchestrator.apply_ddl(&table, ddl).await?;
            }
        }
    }

    orchestrator.stop().await;

    if shutdown.is_shutdown_requested() {
        return Err(CliError::ShutdownRequested);
    }
    info!("replay complete");
    Ok(())
}

async fn show_dry_run(
    config_path: &str,
    state_dir: &str,
    project: &str,
    dataset: &str,
    table: &str,
    batch_id: i64,
) -> Result<(), CliError> {
    let raw = tokio::fs::read_to_string(config_path)
        .await
        .map_err(|source| CliError::Read { path: config_path.to_string(), source })?;
    let pipeline: config::PipelineConfig = toml::from_str(&raw)?;

    let warehouse: Arc<dyn Warehouse> = Arc::new(InMemoryWarehouse::new());
    let blob_store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
    blob_store.create_bucket(&pipeline.blob_bucket).await?;
    let state: Arc<dyn StateStore> = Arc::new(SledStateStore::open(state_dir)?);

    let orchestrator = ConsumerOrchestrator::new(warehouse, blob_store, state, pipeline.orchestrator_config());

    for table_cfg in &pipeline.tables {
        orchestrator
            .register_table(table_cfg.table_id(), table_cfg.schema(), table_cfg.primary_keys.clone(), table_cfg.runtime_config())
            .await;
    }

    let table_id = delta_model::TableId::new(project.to_string(), dataset.to_string(), table.to_string());
    let report = orchestrator.dry_run_merge(&table_id, batch_id).await?;

    println!("Dry run for {table_id} batch {batch_id}:");
    println!("{:<16} {}", "Job id", report.job_id);
    println!("{:<16} {}", "Latest merged", report.latest_merged);
    println!("{}", report.generated_sql);
    Ok(())
}

async fn show_progress(state_dir: &str, project: &str, dataset: &str, table: &str, as_json: bool) -> Result<(), CliError> {
    let store = SledStateStore::open(state_dir)?;
    let table_id = delta_model::TableId::new(project.to_string(), dataset.to_string(), table.to_string());
    let counters = store.get_sequence_counters(&table_id).await?;

    if as_json {
        let json = serde_json::to_string_pretty(&counters.map(|c| (c.latest_seen, c.latest_merged)))
            .map_err(CliError::JsonSerialize)?;
        println!("{json}");
    } else {
        match counters {
            Some(c) => {
                println!("Progress for {table_id}:");
                println!("{:<16} {}", "Latest seen", c.latest_seen);
                println!("{:<16} {}", "Latest merged", c.latest_merged);
            }
            None => println!("No sequence counters recorded yet for {table_id}"),
        }
    }
    Ok(())
}
