//! callwire gateway
//!
//! Serves the signaling protocol over WebSocket on `/ws`, with `/health` and
//! `/status` for operators.

mod collaborators;
mod config;
mod logging;
mod server;

use anyhow::{Context, Result};
use callwire_signal_core::Orchestrator;
use clap::Parser;
use tracing::{info, warn};

use crate::config::{Args, GatewayConfig};
use crate::logging::{log_welcome, setup_logging, LoggingConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::load(args.config.as_ref())?;
    config.apply_args(&args);

    setup_logging(&LoggingConfig::from_settings(&config.log)?)?;
    log_welcome("callwire-gateway", env!("CARGO_PKG_VERSION"));
    config.validate()?;

    let (handle, worker) = Orchestrator::spawn(config.signal.clone(), collaborators::build(config.media.limit))
        .context("failed to start orchestrator")?;

    let app = server::router(server::AppState { handle: handle.clone() });
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutting down orchestrator");
    if let Err(e) = handle.shutdown() {
        warn!("Orchestrator already stopped: {}", e);
    }
    worker.await.context("orchestrator task failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received ctrl-c");
}
