//! PQRS API entry point.

use anyhow::Context as _;
use clap::Parser;

use pqrs_api::api::{ApiState, start_http_server};
use pqrs_api::config::Config;

use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pqrs-api")]
#[command(about = "PQRS backend metrics and health service")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Override the listen address, e.g. 127.0.0.1:8000
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        Config::load(cli.config.as_deref()).with_context(|| match &cli.config {
            Some(path) => format!("failed to load config from {}", path.display()),
            None => "failed to load configuration".to_owned(),
        })?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
        config.validate().context("invalid --bind address")?;
    }

    let tracing_guard =
        pqrs_api::logging::init_tracing(&config.logging, &config.telemetry, cli.debug);

    let result = run(config).await;
    if let Err(error) = &result {
        tracing::error!(%error, "PQRS API failed");
    }
    tracing_guard.shutdown();
    result
}

async fn run(config: Config) -> anyhow::Result<()> {
    let bind = config.bind_addr()?;
    tracing::info!(
        %bind,
        environment = %config.app.environment,
        version = %config.app.version,
        "starting PQRS API"
    );

    let state = Arc::new(ApiState::from_config(&config).context("failed to build API state")?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let server = start_http_server(bind, state, shutdown_rx)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Err(error) = server.await {
        tracing::warn!(%error, "HTTP server task failed");
    }

    tracing::info!("PQRS API stopped");
    Ok(())
}
