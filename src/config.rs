//! Backfill configuration
//!
//! Defaults, optional TOML overrides file, then environment variables.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Selector used when none is given on the command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Default day-count window
    #[serde(default = "default_days")]
    pub days: u32,

    /// Store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Retry/backoff policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Exchange endpoints
    #[serde(default)]
    pub exchanges: ExchangesConfig,
}

fn default_days() -> u32 {
    14
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            selector: None,
            days: default_days(),
            store: StoreConfig::default(),
            retry: RetryConfig::default(),
            exchanges: ExchangesConfig::default(),
        }
    }
}

impl BackfillConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Defaults (or the given overrides file) with environment applied on top
    pub fn resolve(conf_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match conf_path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("BACKFILL_DB_PATH") {
            self.store.db_path = path;
        }
        if let Ok(selector) = std::env::var("BACKFILL_SELECTOR") {
            self.selector = Some(selector);
        }
        if let Ok(days) = std::env::var("BACKFILL_DAYS") {
            if let Ok(n) = days.parse() {
                self.days = n;
            }
        }
        if let Ok(url) = std::env::var("BINANCE_API_URL") {
            self.exchanges.binance_api_url = url;
        }
        if let Ok(url) = std::env::var("COINBASE_API_URL") {
            self.exchanges.coinbase_api_url = url;
        }
    }
}

/// SQLite store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Enable WAL mode
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

fn default_db_path() -> String {
    "backfill.db".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            wal_mode: true,
        }
    }
}

/// Retry and backoff policy for the backfill loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Forward mode: attempts allowed while the source keeps returning nothing
    #[serde(default = "default_empty_batch_max_attempts")]
    pub empty_batch_max_attempts: u32,

    /// Forward mode: wait between empty attempts; the window also moves by this much
    #[serde(default = "default_empty_batch_delay_ms")]
    pub empty_batch_delay_ms: u64,

    /// Fixed wait before a failed batch write is retried
    #[serde(default = "default_persist_retry_delay_ms")]
    pub persist_retry_delay_ms: u64,

    /// First transport-error backoff
    #[serde(default = "default_transient_backoff_base_ms")]
    pub transient_backoff_base_ms: u64,

    /// Transport-error backoff cap
    #[serde(default = "default_transient_backoff_max_ms")]
    pub transient_backoff_max_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// ±fraction of jitter applied to each backoff
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_empty_batch_max_attempts() -> u32 {
    720
} // two hours of 10s polls
fn default_empty_batch_delay_ms() -> u64 {
    10_000
}
fn default_persist_retry_delay_ms() -> u64 {
    10_000
}
fn default_transient_backoff_base_ms() -> u64 {
    250
}
fn default_transient_backoff_max_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_jitter_factor() -> f64 {
    0.3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            empty_batch_max_attempts: default_empty_batch_max_attempts(),
            empty_batch_delay_ms: default_empty_batch_delay_ms(),
            persist_retry_delay_ms: default_persist_retry_delay_ms(),
            transient_backoff_base_ms: default_transient_backoff_base_ms(),
            transient_backoff_max_ms: default_transient_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    pub fn empty_batch_delay(&self) -> Duration {
        Duration::from_millis(self.empty_batch_delay_ms)
    }

    pub fn persist_retry_delay(&self) -> Duration {
        Duration::from_millis(self.persist_retry_delay_ms)
    }
}

/// Exchange endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangesConfig {
    #[serde(default = "default_binance_api_url")]
    pub binance_api_url: String,

    #[serde(default = "default_coinbase_api_url")]
    pub coinbase_api_url: String,

    /// Per-request HTTP timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_binance_api_url() -> String {
    "https://api.binance.com".to_string()
}
fn default_coinbase_api_url() -> String {
    "https://api.exchange.coinbase.com".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ExchangesConfig {
    fn default() -> Self {
        Self {
            binance_api_url: default_binance_api_url(),
            coinbase_api_url: default_coinbase_api_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ExchangesConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
