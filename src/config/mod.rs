//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`, or from the
//! `PARTY_MARKET_CONFIG` environment variable holding the document inline.
//! Economic parameters (starting grant, admin bootstrap) live here, the
//! domain layer never reads the environment.

pub mod loader;

use serde::Deserialize;

/// Top-level service configuration.
///
/// Every section is optional; missing sections fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
  /// Service identity and logging.
  #[serde(default)]
  pub app: AppSection,
  /// Market economics and admin bootstrap.
  #[serde(default)]
  pub market: MarketSection,
  /// Snapshot persistence.
  #[serde(default)]
  pub persistence: PersistenceConfig,
  /// Expiry sweep.
  #[serde(default)]
  pub sweep: SweepConfig,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
  /// Human-readable service name.
  #[serde(default = "default_app_name")]
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

impl Default for AppSection {
  fn default() -> Self {
    Self {
      name: default_app_name(),
      log_level: default_log_level(),
    }
  }
}

/// Market economics.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketSection {
  /// Tokens granted to every newly registered player.
  #[serde(default)]
  pub starting_tokens: i64,
  /// Name of the admin created on a fresh start.
  #[serde(default = "default_admin_name")]
  pub admin_name: String,
  /// Pin of the admin created on a fresh start.
  #[serde(default = "default_admin_pin")]
  pub admin_pin: String,
}

impl Default for MarketSection {
  fn default() -> Self {
    Self {
      starting_tokens: 0,
      admin_name: default_admin_name(),
      admin_pin: default_admin_pin(),
    }
  }
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Snapshot file. Empty runs the market in memory only.
  #[serde(default)]
  pub snapshot_path: String,
  /// How often a dirty state is written (seconds).
  #[serde(default = "default_interval")]
  pub snapshot_interval_seconds: u64,
}

impl PersistenceConfig {
  /// True when a snapshot path is configured.
  pub fn enabled(&self) -> bool {
    !self.snapshot_path.trim().is_empty()
  }
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      snapshot_path: String::new(),
      snapshot_interval_seconds: default_interval(),
    }
  }
}

/// Expiry sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
  /// Seconds between sweeps.
  #[serde(default = "default_interval")]
  pub interval_seconds: u64,
}

impl Default for SweepConfig {
  fn default() -> Self {
    Self {
      interval_seconds: default_interval(),
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: default_true(),
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

// Default value functions for serde

fn default_app_name() -> String {
  "party-market".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_admin_name() -> String {
  "Admin".to_string()
}

fn default_admin_pin() -> String {
  "0000".to_string()
}

fn default_interval() -> u64 {
  60
}

fn default_true() -> bool {
  true
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}
