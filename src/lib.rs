//! Party Market — Library Root
//!
//! Token-ledger prediction market for party games: players bet play tokens
//! on admin-run predictions and get paid out at parimutuel odds.
//!
//! Re-exports all modules for integration tests and benchmarks.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod usecases;
