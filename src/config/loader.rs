//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml` (or the inline document in
//! `PARTY_MARKET_CONFIG`), validating all parameters, and providing
//! clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;
use crate::domain::user::validate_name;

/// Environment variable that may carry the whole TOML document.
pub const CONFIG_ENV: &str = "PARTY_MARKET_CONFIG";

/// Load and validate configuration.
///
/// When `PARTY_MARKET_CONFIG` is set and non-empty its content is parsed
/// and `path` is ignored.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let (content, source) = match std::env::var(CONFIG_ENV) {
    Ok(inline) if !inline.trim().is_empty() => (inline, CONFIG_ENV.to_string()),
    _ => {
      let path = Path::new(path);
      let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
      (content, path.display().to_string())
    }
  };

  let config = parse_config(&content)
    .with_context(|| format!("Invalid configuration from {source}"))?;

  info!(
    source = %source,
    starting_tokens = config.market.starting_tokens,
    persistence = config.persistence.enabled(),
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate a TOML document.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content)
    .with_context(|| "Failed to parse configuration TOML")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Non-negative starting grant
/// - A usable admin name and a non-empty admin pin
/// - Positive intervals
fn validate_config(config: &AppConfig) -> Result<()> {
  // Market validation
  anyhow::ensure!(
    config.market.starting_tokens >= 0,
    "starting_tokens must not be negative, got {}",
    config.market.starting_tokens
  );
  validate_name(&config.market.admin_name)
    .map_err(|e| anyhow::anyhow!("admin_name is not usable: {e}"))?;
  anyhow::ensure!(
    !config.market.admin_pin.is_empty(),
    "admin_pin must not be empty"
  );

  // Interval validation
  anyhow::ensure!(
    config.persistence.snapshot_interval_seconds > 0,
    "snapshot_interval_seconds must be positive"
  );
  anyhow::ensure!(
    config.sweep.interval_seconds > 0,
    "sweep interval_seconds must be positive"
  );

  // Metrics validation
  if config.metrics.enabled {
    anyhow::ensure!(
      !config.metrics.bind_address.is_empty(),
      "metrics bind_address must not be empty when metrics are enabled"
    );
  }

  Ok(())
}
