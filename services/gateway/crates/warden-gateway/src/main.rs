//! warden gateway entry point.
//!
//! Initialises tracing, loads configuration from `WARDEN_GW_*`
//! environment variables, connects the selected store backend, and
//! serves the agent protocol over HTTP.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use warden_gateway::{build_router, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("warden-gateway starting");

    let config = Config::from_env().context("failed to load config from WARDEN_GW_* env vars")?;
    if config.operator_token_map().is_empty() {
        tracing::warn!("no operator tokens configured, operator endpoints will reject everything");
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        valkey_url = %config.valkey_url,
        store_backend = ?config.store_backend,
        "configuration loaded",
    );

    let listen_addr = config.listen_addr.clone();
    let state = AppState::from_config(config).await?;
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;

    tracing::info!("gateway ready on http://{listen_addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("warden-gateway shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl-C handler");
    }
    tracing::info!("received shutdown signal");
}
