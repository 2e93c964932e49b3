//! Environment-sourced service configuration
//!
//! All settings come from `ANALYTICS_`-prefixed environment variables
//! (e.g. `ANALYTICS_REDIS_URL`, `ANALYTICS_STARTING_PRICE`) with the
//! defaults below, and are immutable for the process lifetime.

use serde::Deserialize;

/// Process-wide settings, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    // Transport
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,

    // HTTP read-side
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    // Volatility engine
    #[serde(default = "default_volatility_window_minutes")]
    pub volatility_window_minutes: i64,

    // Price feed simulation
    #[serde(default = "default_price_tick_interval_secs")]
    pub price_tick_interval_secs: u64,
    #[serde(default = "default_starting_price")]
    pub starting_price: f64,
    #[serde(default = "default_volatility_factor")]
    pub volatility_factor: f64,
    #[serde(default = "default_feed_seed")]
    pub feed_seed: u64,

    // Risk thresholds
    #[serde(default = "default_high_volatility_threshold")]
    pub high_volatility_threshold: f64,
    #[serde(default = "default_extreme_volatility_threshold")]
    pub extreme_volatility_threshold: f64,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_stream_name() -> String {
    "orders:stream".to_string()
}

fn default_consumer_group() -> String {
    "analytics-group".to_string()
}

fn default_consumer_name() -> String {
    "analytics-consumer-1".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_block_ms() -> u64 {
    1000
}

fn default_retry_backoff_secs() -> u64 {
    1
}

fn default_result_ttl_secs() -> u64 {
    86_400
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_volatility_window_minutes() -> i64 {
    1
}

fn default_price_tick_interval_secs() -> u64 {
    1
}

fn default_starting_price() -> f64 {
    45_000.0
}

fn default_volatility_factor() -> f64 {
    0.02
}

fn default_feed_seed() -> u64 {
    42
}

fn default_high_volatility_threshold() -> f64 {
    0.05
}

fn default_extreme_volatility_threshold() -> f64 {
    0.10
}

impl Default for Settings {
    fn default() -> Self {
        // serde fills every field from its default fn
        serde_json::from_str("{}").expect("defaults are total")
    }
}

impl Settings {
    /// Load settings from `ANALYTICS_*` environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("ANALYTICS"))
            .build()?
            .try_deserialize()
    }
}
