//! Party Market — Entry Point
//!
//! Initializes configuration, logging, persistence and the market engine.
//! Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config (PARTY_MARKET_CONFIG inline, else the given path) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Create metrics registry and event hub, fan events out to both
//! 4. Create MarketEngine
//! 5. Open the snapshot store (or run in memory only)
//! 6. Restore the last snapshot or bootstrap the admin, mark ready
//! 7. Spawn sweeper, snapshotter, metrics + health servers, gauge refresh
//! 8. Wait for SIGINT → graceful shutdown (stop→save→exit)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use party_market::adapters::events::{EventHub, FanoutSink};
use party_market::adapters::metrics::{HealthServer, HealthState, MarketMetrics};
use party_market::adapters::persistence::SnapshotStore;
use party_market::config;
use party_market::ports::{EventSink, SnapshotRepository};
use party_market::usecases::snapshotter::{self, AdminBootstrap};
use party_market::usecases::{MarketEngine, sweep};

const GAUGE_REFRESH: Duration = Duration::from_secs(15);
const FINAL_SAVE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(&config.app.log_level)
                }),
        )
        .json()
        .init();

    info!(
        name = %config.app.name,
        version = env!("CARGO_PKG_VERSION"),
        starting_tokens = config.market.starting_tokens,
        "Starting Party Market"
    );

    // ── 3. Shutdown channel, metrics, event fan-out ─────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    let metrics = Arc::new(MarketMetrics::new().context("Failed to register metrics")?);
    let hub = Arc::new(EventHub::default());
    let sinks: Vec<Arc<dyn EventSink>> = vec![
        Arc::clone(&hub) as Arc<dyn EventSink>,
        Arc::clone(&metrics) as Arc<dyn EventSink>,
    ];
    let events = Arc::new(FanoutSink::new(sinks));

    // ── 4. Market engine ────────────────────────────────────
    let engine = Arc::new(MarketEngine::new(events, config.market.starting_tokens));

    // ── 5. Snapshot store ───────────────────────────────────
    let store: Option<Arc<dyn SnapshotRepository>> = if config.persistence.enabled() {
        let store = SnapshotStore::new(&config.persistence.snapshot_path)
            .await
            .context("Failed to open snapshot store")?
            .with_metrics(Arc::clone(&metrics));
        info!(path = %store.path().display(), "Snapshot persistence enabled");
        Some(Arc::new(store))
    } else {
        warn!("No snapshot_path configured, running without persistence");
        None
    };

    // ── 6. Restore or bootstrap ─────────────────────────────
    let admin = AdminBootstrap {
        name: config.market.admin_name.clone(),
        pin: config.market.admin_pin.clone(),
    };
    let startup = snapshotter::restore_or_bootstrap(&engine, store.as_deref(), &admin).await?;
    let health = Arc::new(HealthState::new());
    health.mark_restored();
    info!(startup = ?startup, "Market state ready");

    // ── 7. Background tasks ─────────────────────────────────
    let sweep_handle = tokio::spawn(sweep::run_sweeper(
        Arc::clone(&engine),
        Duration::from_secs(config.sweep.interval_seconds),
        shutdown_tx.subscribe(),
    ));

    let snapshot_handle = store.map(|store| {
        tokio::spawn(snapshotter::run_snapshotter(
            Arc::clone(&engine),
            store,
            Duration::from_secs(config.persistence.snapshot_interval_seconds),
            shutdown_tx.subscribe(),
        ))
    });

    let metrics_handle = if config.metrics.enabled {
        let server = Arc::clone(&metrics);
        let bind_address = config.metrics.bind_address.clone();
        let shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = server.serve(bind_address, shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        }))
    } else {
        None
    };

    let health_server = HealthServer::new(Arc::clone(&health), config.metrics.health_port);
    let health_shutdown = shutdown_tx.subscribe();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run(health_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    let gauge_handle = tokio::spawn(refresh_gauges(
        Arc::clone(&engine),
        Arc::clone(&metrics),
        shutdown_tx.subscribe(),
    ));

    let event_log_handle = tokio::spawn(log_events(hub.subscribe(), shutdown_tx.subscribe()));

    info!("All tasks spawned — market is running");

    // ── 8. Wait for SIGINT ──────────────────────────────────
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for SIGINT");
    }
    info!("SIGINT received, initiating graceful shutdown");

    // ── Graceful shutdown (stop→save→exit) ──

    // 1. Readiness check → 503
    health.mark_shutting_down();

    // 2. Signal all tasks to stop
    let _ = shutdown_tx.send(());
    info!("Shutdown signal broadcast to all tasks");

    // 3. Wait for the final snapshot
    if let Some(handle) = snapshot_handle {
        if tokio::time::timeout(FINAL_SAVE_TIMEOUT, handle).await.is_err() {
            error!("Final snapshot did not finish in time");
        }
    }

    // 4. Stop the rest
    let _ = tokio::time::timeout(Duration::from_secs(5), sweep_handle).await;
    if let Some(handle) = metrics_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    health_handle.abort();
    gauge_handle.abort();
    event_log_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Keep the state gauges current.
async fn refresh_gauges(
    engine: Arc<MarketEngine>,
    metrics: Arc<MarketMetrics>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(GAUGE_REFRESH);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => metrics.observe(&engine.stats().await),
        }
    }
}

/// Trace every change notification at debug level.
async fn log_events(
    mut events: broadcast::Receiver<party_market::ports::MarketEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            received = events.recv() => match received {
                Ok(event) => debug!(event = ?event, "Market event"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event log lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
