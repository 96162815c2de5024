//! Async coordinator - request registry, rate limits and fee escrow
//!
//! Runs the coordination engine behind an HTTP API, sweeps due timeouts
//! and hands listener, gateway and inbox calls to the delivery channel.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};

use async_coordinator::api;
use async_coordinator::clock::SystemClock;
use async_coordinator::config::Settings;
use async_coordinator::coordination::CoordinationEngine;
use async_coordinator::host::{ChannelHost, StaticConnections};
use async_coordinator::metrics::{self, MetricsServer};
use async_coordinator::registry::RequestRegistry;
use async_coordinator::state::{EventSink, MemoryJournal, StateManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting async coordinator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration: {} plugs, {} gateway aliases, {} default limits",
        settings.plugs.len(),
        settings.gateway_aliases.len(),
        settings.limits.len()
    );

    // Initialize the event journal
    let sink: Arc<dyn EventSink> = match &settings.database {
        Some(database) => {
            let state_manager = StateManager::new(database).await?;
            info!("Database connection established");
            state_manager.run_migrations().await?;
            Arc::new(state_manager)
        }
        None => {
            warn!("No database configured - journaling in memory only");
            Arc::new(MemoryJournal::new())
        }
    };

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Collaborators
    let connections = Arc::new(StaticConnections::from_config(
        &settings.plugs,
        &settings.gateway_aliases,
    ));
    let (host, mut outbound) = ChannelHost::new();

    // Initialize coordination engine
    let registry = RequestRegistry::new(
        settings.registry_config(),
        connections,
        Arc::new(host),
        Arc::new(SystemClock),
    );
    let coordination_engine = Arc::new(CoordinationEngine::new(
        registry,
        sink.clone(),
        settings.coordinator.clone(),
    ));
    info!("Coordination engine initialized");

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let engine = coordination_engine.clone();
        async move {
            if let Err(e) = api::run_server(config, engine).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Hand outbound calls to the delivery process
    let delivery_handle = tokio::spawn(async move {
        while let Some(call) = outbound.recv().await {
            match serde_json::to_string(&call) {
                Ok(json) => info!(target: "delivery", "{}", json),
                Err(e) => error!("Failed to encode outbound call: {}", e),
            }
        }
    });

    // Log committed events
    let events_handle = tokio::spawn({
        let mut events = coordination_engine.subscribe();
        async move {
            loop {
                match events.recv().await {
                    Ok(event) => debug!("Committed {}", event.name()),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event log lagged, skipped {} events", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    });

    // Start coordination engine
    let coordination_handle = tokio::spawn({
        let engine = coordination_engine.clone();
        async move {
            if let Err(e) = engine.run().await {
                error!("Coordination engine error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let sink = sink.clone();
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;

                match sink.health_check().await {
                    Ok(()) => metrics::record_health_check(),
                    Err(e) => {
                        warn!("Journal health check failed: {}", e);
                        metrics::record_health_check_failure();
                    }
                }
            }
        }
    });

    info!("Async coordinator is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    coordination_engine.stop().await;

    // Abort background tasks
    api_handle.abort();
    coordination_handle.abort();
    delivery_handle.abort();
    events_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Async coordinator stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,async_coordinator=debug,sqlx=warn,hyper=warn")
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
