//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates the domain with the port interfaces. Each use case is a
//! self-contained workflow.
//!
//! Use cases:
//! - `MarketEngine`: lock-guarded facade over the market state, emits events
//! - `sweep`: periodic closing of expired predictions
//! - `snapshotter`: restore/bootstrap on startup, periodic and final saves

pub mod market_engine;
pub mod snapshotter;
pub mod sweep;

pub use market_engine::{AuthSession, MarketEngine};
pub use snapshotter::{AdminBootstrap, Startup};
