//! Runtime configuration
//!
//! Loaded from `$PITAX_CONFIG` or `<config_home>/pitax/config.toml`. Every
//! key is optional; a missing file means all defaults. `PITAX_DB` and
//! `PITAX_OFFLINE` override the file.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::TaxError;
use crate::fx::{nbp, StaticRates, DEFAULT_LOOKBACK_DAYS};

pub const CONFIG_ENV: &str = "PITAX_CONFIG";
pub const DB_ENV: &str = "PITAX_DB";
pub const OFFLINE_ENV: &str = "PITAX_OFFLINE";

/// Upper bound for `rate_lookback_days`
pub const MAX_LOOKBACK_DAYS: u32 = 31;

/// Fixed exchange rate entry, used in offline mode and ahead of NBP online
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RateEntry {
    pub currency: String,
    pub date: NaiveDate,
    pub rate: Decimal,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database_path: Option<PathBuf>,
    pub nbp_base_url: String,
    pub rate_lookback_days: u32,
    pub http_timeout_secs: u64,
    pub channel_capacity: usize,
    pub offline: bool,
    pub rates: Vec<RateEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            nbp_base_url: nbp::NBP_API_URL.to_string(),
            rate_lookback_days: DEFAULT_LOOKBACK_DAYS,
            http_timeout_secs: 10,
            channel_capacity: 64,
            offline: false,
            rates: Vec::new(),
        }
    }
}

impl Config {
    /// Resolve the config path, read it if present, then apply env overrides
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| TaxError::Config(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(TaxError::Config("channel_capacity must be at least 1".to_string()).into());
        }
        if self.rate_lookback_days > MAX_LOOKBACK_DAYS {
            return Err(TaxError::Config(format!(
                "rate_lookback_days must be at most {}",
                MAX_LOOKBACK_DAYS
            ))
            .into());
        }
        if self.http_timeout_secs == 0 {
            return Err(TaxError::Config("http_timeout_secs must be at least 1".to_string()).into());
        }
        if let Some(bad) = self.rates.iter().find(|r| r.rate <= Decimal::ZERO) {
            return Err(TaxError::Config(format!(
                "rate for {} on {} must be positive",
                bad.currency, bad.date
            ))
            .into());
        }
        Ok(())
    }

    /// Apply `PITAX_DB` / `PITAX_OFFLINE` through a lookup so tests need no real env
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup(DB_ENV).filter(|v| !v.trim().is_empty()) {
            self.database_path = Some(PathBuf::from(db));
        }
        if let Some(flag) = lookup(OFFLINE_ENV) {
            self.offline = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Configured fixed rates as a provider
    pub fn static_rates(&self) -> StaticRates {
        let mut rates = StaticRates::new();
        for entry in &self.rates {
            rates.insert(&entry.currency, entry.date, entry.rate);
        }
        rates
    }
}

/// `$PITAX_CONFIG`, else `<config_home>/pitax/config.toml`
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dir_spec::config_home().map(|dir| dir.join("pitax").join("config.toml"))
}
