//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! infrastructure. Each sub-module groups adapters by concern.
//!
//! Adapter categories:
//! - `events`: broadcast fan-out of market events
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: rotating JSON snapshot file

pub mod events;
pub mod metrics;
pub mod persistence;
