//! Snapshotter Use Case - Restore, Bootstrap and Periodic Saves
//!
//! On startup the market is restored from the latest snapshot or, on a
//! first start, bootstrapped with an admin account. While running, the
//! state is written out whenever it is dirty, and once more on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use crate::ports::repository::SnapshotRepository;
use crate::usecases::market_engine::MarketEngine;

/// How the market came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
  /// State was loaded from an existing snapshot.
  Restored,
  /// No snapshot existed; a fresh market with an admin was created.
  Bootstrapped,
}

/// Credentials for the admin created on a first start.
#[derive(Debug, Clone)]
pub struct AdminBootstrap {
  pub name: String,
  pub pin: String,
}

/// Restore the last snapshot, or create the admin user if there is none.
#[instrument(skip_all)]
pub async fn restore_or_bootstrap(
  engine: &MarketEngine,
  repo: Option<&dyn SnapshotRepository>,
  admin: &AdminBootstrap,
) -> Result<Startup> {
  if let Some(repo) = repo {
    if let Some(bytes) = repo.load().await.context("Failed to load snapshot")? {
      engine
        .import_bytes(&bytes)
        .await
        .context("Failed to decode snapshot")?;
      let stats = engine.stats().await;
      info!(
        users = stats.users,
        open_predictions = stats.open_predictions,
        ledger_entries = stats.ledger_entries,
        "Market restored from snapshot"
      );
      return Ok(Startup::Restored);
    }
  }

  engine
    .create_admin(&admin.name, &admin.pin)
    .await
    .context("Failed to create admin user")?;
  info!(admin = %admin.name, "Fresh market bootstrapped");
  Ok(Startup::Bootstrapped)
}

/// Write a snapshot if anything changed since the last one.
///
/// Returns whether a snapshot was written. A failed write leaves the state
/// dirty so the next tick tries again.
pub async fn save_if_dirty(engine: &MarketEngine, repo: &dyn SnapshotRepository) -> Result<bool> {
  if !engine.is_dirty().await {
    return Ok(false);
  }
  let bytes = engine.export_bytes().await?;
  if let Err(e) = repo.save(&bytes).await {
    engine.mark_dirty().await;
    return Err(e);
  }
  Ok(true)
}

/// Save every `interval` while dirty; save a final time on shutdown.
pub async fn run_snapshotter(
  engine: Arc<MarketEngine>,
  repo: Arc<dyn SnapshotRepository>,
  interval: Duration,
  mut shutdown_rx: broadcast::Receiver<()>,
) {
  let mut ticker = tokio::time::interval(interval);
  ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
  // First tick fires immediately; nothing to save yet.
  ticker.tick().await;

  info!(interval_secs = interval.as_secs(), "Snapshotter started");
  loop {
    tokio::select! {
      biased;
      _ = shutdown_rx.recv() => {
        info!("Snapshotter received shutdown signal");
        break;
      }
      _ = ticker.tick() => {
        if let Err(e) = save_if_dirty(&engine, repo.as_ref()).await {
          error!(error = %e, "Periodic snapshot failed");
        }
      }
    }
  }

  match save_if_dirty(&engine, repo.as_ref()).await {
    Ok(true) => info!("Final snapshot saved"),
    Ok(false) => info!("No changes since last snapshot"),
    Err(e) => error!(error = %e, "Final snapshot failed"),
  }
}
