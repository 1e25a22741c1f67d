//! Sweep Use Case - Automatic Closing of Expired Predictions
//!
//! Periodically closes open predictions whose close time has passed.
//! Uses the same locked operations as every other caller; predictions
//! without a close time are never touched.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::domain::ids;
use crate::usecases::market_engine::MarketEngine;

/// Run one sweep at the current time. Returns how many predictions closed.
pub async fn sweep_once(engine: &MarketEngine) -> usize {
  let closed = engine.close_expired(ids::now()).await;
  if closed.is_empty() {
    debug!("Sweep found nothing to close");
  } else {
    info!(closed = closed.len(), "Sweep closed expired predictions");
  }
  closed.len()
}

/// Sweep once immediately, then every `interval` until shutdown.
pub async fn run_sweeper(
  engine: Arc<MarketEngine>,
  interval: Duration,
  mut shutdown_rx: broadcast::Receiver<()>,
) {
  let mut ticker = tokio::time::interval(interval);
  ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

  info!(interval_secs = interval.as_secs(), "Sweeper started");
  loop {
    tokio::select! {
      biased;
      _ = shutdown_rx.recv() => {
        info!("Sweeper received shutdown signal");
        break;
      }
      _ = ticker.tick() => {
        sweep_once(&engine).await;
      }
    }
  }
}
