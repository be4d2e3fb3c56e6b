//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The GW2 commerce endpoints need no credentials; everything here is
//! plain tuning knobs.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::types::ItemId;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub engine: EngineConfig,
    pub strategy: StrategySection,
    pub tracker: TrackerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Ids per bulk request; the upstream API caps this at 200.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds to wait after a 429 before retrying a page.
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,
    /// Seconds to wait after a 5xx or other transient failure.
    #[serde(default = "default_transient_cooldown_secs")]
    pub transient_cooldown_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Nominal seconds between refresh cycles.
    pub refresh_interval_secs: u64,
    /// Trailing horizons to track, in seconds, e.g. 15 min / 90 min / 6 h.
    pub horizons_secs: Vec<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategySection {
    /// Copper-per-cycle price trend at which our orders count as raced past.
    pub outbid_fraction: f64,
    /// Capital per flip, in copper.
    pub budget: i64,
    /// How many of the top flips to log each cycle.
    #[serde(default = "default_report_top")]
    pub report_top: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// Explicit item ids to track. Empty means: discover the full
    /// tradeable list and take the first `max_tracked_items`.
    #[serde(default)]
    pub watchlist: Vec<ItemId>,
    #[serde(default = "default_max_tracked_items")]
    pub max_tracked_items: usize,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> usize {
    200
}

fn default_max_attempts() -> u32 {
    10
}

fn default_rate_limit_cooldown_secs() -> u64 {
    30
}

fn default_transient_cooldown_secs() -> u64 {
    5
}

fn default_report_top() -> usize {
    10
}

fn default_max_tracked_items() -> usize {
    1000
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }
}
