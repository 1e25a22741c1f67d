//! Repository Port - Snapshot Persistence Interface
//!
//! Byte-level storage for encoded market snapshots. The engine produces
//! and consumes the bytes; a repository only has to keep the most recent
//! image safe across restarts.

use async_trait::async_trait;

/// Trait for snapshot persistence providers.
///
/// `save` must replace the previous snapshot atomically: after a crash the
/// store holds either the old image or the new one, never a mix.
#[async_trait]
pub trait SnapshotRepository: Send + Sync + 'static {
  /// Persist an encoded snapshot, replacing the previous one.
  async fn save(&self, snapshot: &[u8]) -> anyhow::Result<()>;

  /// Load the most recent snapshot. `None` on first start.
  async fn load(&self) -> anyhow::Result<Option<Vec<u8>>>;

  /// Check if the repository is usable (paths writable, files readable).
  async fn is_healthy(&self) -> bool;
}
