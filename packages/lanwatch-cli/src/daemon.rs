//! Long-running service mode
//!
//! This module wires the core pieces into one process that:
//! - Serves the HTTP API and the node gateway WebSocket
//! - Runs scheduled scans and the stale-node sweeper
//! - Shuts down gracefully on SIGTERM/SIGINT, writing pending state last

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use lanwatch_core::config::{self, Config};
use lanwatch_core::{AppState, DeviceRegistry, DeviceStore, JsonFileStore, MemoryStore, NodeRegistry, ScanCoordinator};
use tokio_util::sync::CancellationToken;

/// Open the configured store and load the registry from it.
pub fn build_registry(config: &Config) -> Result<Arc<DeviceRegistry>> {
    let max_events = config.storage.max_events_per_device;
    let store: Arc<dyn DeviceStore> = if config.storage.persist {
        let path = config
            .storage
            .path
            .clone()
            .or_else(config::default_state_path)
            .context("No data directory available for the state file; set storage.path")?;
        let store = JsonFileStore::open(&path, max_events)
            .with_context(|| format!("Failed to open state file {}", path.display()))?;
        tracing::info!("Persisting state to {}", store.path().display());
        Arc::new(store)
    } else {
        tracing::info!("Persistence disabled, keeping state in memory");
        Arc::new(MemoryStore::new(max_events))
    };

    let registry = Arc::new(DeviceRegistry::new(store, max_events));
    let loaded = registry.load();
    tracing::info!("Loaded {} known devices", loaded);
    Ok(registry)
}

/// Run the service until a shutdown signal arrives.
pub async fn run_service(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let registry = build_registry(&config)?;
    let coordinator = Arc::new(ScanCoordinator::from_config(&config, registry));
    let nodes = Arc::new(NodeRegistry::new());
    let state = Arc::new(AppState::new(Arc::clone(&config), coordinator, Arc::clone(&nodes)));

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    if config.server.api_token.is_none() {
        tracing::warn!("No API token configured; the API is open to anyone who can reach {}", addr);
    }
    tracing::info!("Listening on http://{}", addr);

    let shutdown = CancellationToken::new();
    let background = lanwatch_core::scheduler::spawn_background(&config, &state, &shutdown);

    let app = lanwatch_core::router(Arc::clone(&state));
    let signal_token = shutdown.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            signal_token.cancel();
        })
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    state.coordinator.stop();
    nodes.close();
    for handle in background {
        if let Err(e) = handle.await {
            tracing::warn!("Background task ended abnormally: {}", e);
        }
    }

    let registry = Arc::clone(state.registry());
    if let Err(e) = tokio::task::spawn_blocking(move || registry.flush()).await {
        tracing::warn!("Final state flush failed: {}", e);
    }

    tracing::info!("Service stopped");
    Ok(())
}

/// Resolve on Ctrl+C, or SIGTERM on Unix.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => tracing::warn!("Failed to register SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}
