//! # msgate
//!
//! HTTP gateway supervising many persistent, authenticated messaging
//! sessions, one per tenant.
//!
//! ## Overview
//!
//! This server provides endpoints for:
//! - Session pairing (obtain a pairing code to scan)
//! - Session status and listing
//! - Sending text messages through a connected session
//! - Manual reconnection and clearing of sessions
//!
//! ## Architecture
//!
//! This is Layer 2 - the binary that ties together:
//! - msgate-core: Core types, errors and configuration
//! - msgate-session: Session supervision and credential storage

use anyhow::Context;
use msgate::{router, App};
use msgate_core::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1));

    let mut config = match config_path {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => GatewayConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .init();

    tracing::info!("msgate v{} starting...", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Credential storage: {}",
        config.storage.base_dir.display()
    );

    let app = App::from_config(&config)?;

    if let Some(scanner) = app.bootstrap.clone() {
        scanner.spawn();
        tracing::info!("Bootstrap scan scheduled");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("msgate listening on http://{}", addr);

    let service = router(app.state(), config.server.cors);
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            tracing::error!("Server error: {}", e);
            e
        })?;

    tracing::info!("msgate shutting down");
    app.supervisor().shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
