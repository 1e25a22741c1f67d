//! Snapshot Store - Rotating File Persistence
//!
//! Saves encoded market snapshots to a single file. A save writes
//! `<path>.new` first, moves the current file to `<path>.old`, then renames
//! `<path>.new` over `<path>`. The file at `<path>` is therefore always a
//! complete snapshot, and the previous one stays around as a backup.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::{info, instrument, warn};

use crate::adapters::metrics::MarketMetrics;
use crate::ports::repository::SnapshotRepository;

/// File-backed [`SnapshotRepository`] with `.new` / `.old` rotation.
pub struct SnapshotStore {
    /// Live snapshot.
    path: PathBuf,
    /// Staging file for the next snapshot.
    new_path: PathBuf,
    /// Previous snapshot.
    old_path: PathBuf,
    /// Optional save counters.
    metrics: Option<Arc<MarketMetrics>>,
}

impl SnapshotStore {
    /// Create a store for `path`, creating its parent directory if needed.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }

        Ok(Self {
            new_path: with_suffix(&path, ".new"),
            old_path: with_suffix(&path, ".old"),
            path,
            metrics: None,
        })
    }

    /// Count saves in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<MarketMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn rotate_in(&self, snapshot: &[u8]) -> Result<()> {
        fs::write(&self.new_path, snapshot)
            .await
            .context("Failed to write staging snapshot")?;

        match fs::rename(&self.path, &self.old_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(error = %e, path = %self.old_path.display(), "Failed to back up snapshot, ignoring");
            }
        }

        fs::rename(&self.new_path, &self.path)
            .await
            .context("Failed to move staging snapshot into place")?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotRepository for SnapshotStore {
    #[instrument(skip(self, snapshot), fields(path = %self.path.display(), bytes = snapshot.len()))]
    async fn save(&self, snapshot: &[u8]) -> Result<()> {
        let result = self.rotate_in(snapshot).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_snapshot(result.is_ok());
        }
        result?;

        info!("Snapshot saved");
        Ok(())
    }

    /// Returns `None` if no snapshot exists (first startup).
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path).await {
            Ok(bytes) => {
                info!(bytes = bytes.len(), "Snapshot loaded");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No snapshot found, starting fresh");
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to read snapshot"),
        }
    }

    async fn is_healthy(&self) -> bool {
        match fs::metadata(&self.path).await {
            Ok(meta) => meta.is_file(),
            // First run is OK
            Err(e) => e.kind() == ErrorKind::NotFound,
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
