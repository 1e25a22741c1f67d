//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) the use-case layer requires from the
//! outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `EventSink`: fire-and-forget change notifications
//! - `SnapshotRepository`: persistence of encoded market snapshots

pub mod events;
pub mod repository;

pub use events::{EventSink, MarketEvent, NoopSink};
pub use repository::SnapshotRepository;
