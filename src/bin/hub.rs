use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use service_sentinel::{
    actors::rollup::RollupHandle,
    alerts::NotifyingAlertEngine,
    api::{ApiState, spawn_api_server},
    config::{Config, StorageConfig, read_config_file},
    evaluator::FailureEvaluator,
    probes::ProbeExecutor,
    scheduler::{HubPipeline, Scheduler},
    sentinel::ServiceSentinel,
    storage::{MemoryRepository, MonitorRepository},
    util::get_hub_secret,
};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("service_sentinel", LevelFilter::DEBUG),
        ("sentinel_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

/// Open the configured repository and return it with its retention setting
async fn open_repository(config: &Config) -> anyhow::Result<(Arc<dyn MonitorRepository>, u32)> {
    match config.storage.clone().unwrap_or_default() {
        StorageConfig::None => {
            info!("using in-memory storage, results are lost on restart");
            Ok((Arc::new(MemoryRepository::new()), config.sentinel.retention_days))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite {
            path,
            retention_days,
        } => {
            let repository =
                service_sentinel::storage::sqlite::SqliteRepository::new(&path).await?;
            Ok((Arc::new(repository), retention_days))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite storage requested but the storage-sqlite feature is disabled")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let (repository, retention_days) = open_repository(&config).await?;

    for monitor in &config.monitors {
        if let Err(e) = repository.upsert_monitor(monitor).await {
            warn!(monitor_id = monitor.id, "failed to store configured monitor: {}", e);
        }
    }

    let sentinel = Arc::new(ServiceSentinel::new(config.sentinel.clone()));
    sentinel.start(Arc::clone(&repository)).await;

    let alert_engine = Arc::new(
        NotifyingAlertEngine::new(Arc::clone(&repository), config.alerting.clone())
            .context("failed to build alert client")?,
    );
    let evaluator = Arc::new(FailureEvaluator::new(
        Arc::clone(&repository),
        alert_engine,
        config.evaluator.clone(),
    ));
    let pipeline = HubPipeline::new(Arc::clone(&repository), Arc::clone(&sentinel))
        .with_evaluator(evaluator);

    let scheduler = Arc::new(
        Scheduler::new(
            Arc::new(ProbeExecutor::new()?),
            Arc::new(pipeline),
            Arc::clone(&repository),
        )
        .with_sentinel(Arc::clone(&sentinel)),
    );
    scheduler.start().await;

    let rollups = RollupHandle::spawn(
        Arc::clone(&repository),
        Duration::from_secs(config.rollups.interval_secs),
        retention_days,
    );

    let mut api_config = config.api.clone();
    if api_config.auth_token.is_none() {
        api_config.auth_token = get_hub_secret();
    }
    if api_config.auth_token.is_none() {
        warn!("no API token configured, the hub API is open to anyone who can reach it");
    }

    let state = ApiState::new(
        Arc::clone(&scheduler),
        Arc::clone(&sentinel),
        Arc::clone(&repository),
    );
    let addr = spawn_api_server(api_config, state).await?;
    info!(%addr, monitors = config.monitors.len(), "hub running");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    scheduler.stop().await;
    rollups.shutdown().await;
    sentinel.stop().await;
    if let Err(e) = repository.close().await {
        warn!("failed to close repository: {}", e);
    }

    Ok(())
}
