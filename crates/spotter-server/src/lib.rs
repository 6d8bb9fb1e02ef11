//! Spotter Server Library
//!
//! Friend requests, workout partner matching, direct messages and a live
//! event channel per user, served over HTTP and WebSocket.

pub mod core;
pub mod social;

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::core::{AppState, ServerConfig};

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        // Already set, ignore
    }
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    info!("=== Spotter Server ===");
    info!("Features: Friends | Matching | Messages | Realtime");

    let config = ServerConfig::from_env();
    if config.database_url.is_none() {
        config.ensure_dirs()?;
        info!("Data root: {:?}", config.data_root);
        info!("Database: {:?}", config.database_path());
    }

    let store = Arc::new(config.open_store().await?);
    info!("Store initialized");

    let state = AppState::new(config.clone(), store.clone());
    let app = crate::core::router(state);

    info!("Listening on http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until killed
        std::future::pending::<()>().await;
    }
}
