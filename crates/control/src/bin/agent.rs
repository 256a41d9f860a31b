//! Control-plane agent running on every benchmark instance.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use inferbench_config::{Config, ConfigHandle};
use inferbench_control::{router, AgentState};
use inferbench_utils::constants::CONTROL_PORT;

/// Instance-side agent serving the benchmark control-plane API.
#[derive(Parser)]
#[command(name = "inferbench-agent")]
#[command(about = "Serve the benchmark control-plane API")]
struct Cli {
    /// Path to the benchmark configuration delivered at boot.
    #[arg(long, default_value = "/home/ubuntu/config.toml")]
    config: PathBuf,

    /// Port to listen on.
    #[arg(long, default_value_t = CONTROL_PORT)]
    port: u16,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    let shutdown = CancellationToken::new();
    let state = AgentState::new(ConfigHandle::new(config), shutdown.clone());
    let app = router(state);

    let addr = format!("0.0.0.0:{}", cli.port);
    info!(address = %addr, "Starting the control-plane API");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down; terminating supervised processes");
            shutdown.cancel();
        })
        .await
        .context("control-plane server failed")?;

    Ok(())
}
