use std::sync::Arc;

use clap::Parser;
use service_sentinel::{
    actors::uploader::{UploaderHandle, UploaderSettings},
    config::{AgentConfig, read_agent_config_file},
    probes::ProbeExecutor,
    scheduler::{AgentSink, Scheduler},
    storage::MemoryRepository,
    util::{get_agent_id, get_agent_secret},
};
use sysinfo::System;
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
        ("sentinel_agent", LevelFilter::TRACE),
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

/// Config value, then `AGENT_ID`, then the host name
fn resolve_agent_id(config: &AgentConfig) -> anyhow::Result<String> {
    config
        .agent_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .or_else(get_agent_id)
        .or_else(System::host_name)
        .ok_or_else(|| anyhow::anyhow!("no agent id configured and host name unavailable"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let mut config = read_agent_config_file(&args.file)?;
    if config.token.is_none() {
        config.token = get_agent_secret();
    }
    let agent_id = resolve_agent_id(&config)?;

    let uploader = UploaderHandle::spawn(UploaderSettings::from_agent_config(&config, &agent_id))?;

    // the agent has no database; the configured monitors are its whole registry
    let repository = Arc::new(MemoryRepository::with_monitors(config.monitors.clone()));
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(ProbeExecutor::new()?),
        Arc::new(AgentSink::new(uploader.clone())),
        repository,
    ));
    scheduler.start().await;

    info!(
        agent_id = %agent_id,
        hub = %config.hub_url,
        monitors = config.monitors.len(),
        "agent running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    scheduler.stop().await;
    if let Err(e) = uploader.flush().await {
        warn!("final upload failed: {:#}", e);
    }
    uploader.shutdown().await;

    Ok(())
}
