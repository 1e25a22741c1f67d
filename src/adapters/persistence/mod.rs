//! Persistence Adapters - File Storage
//!
//! Implements the `SnapshotRepository` port with a single rotating JSON
//! file. No database dependency.

pub mod snapshot_store;

pub use snapshot_store::SnapshotStore;
