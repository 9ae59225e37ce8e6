//! Configuration management for the client.

use comanda_engine::{CacheConfig, RetryPolicy};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";

/// Request timeouts per operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
    /// Closing an order
    pub critical: Duration,
    /// Keep-alive pings
    pub ping: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_millis(5_000),
            write: Duration::from_millis(10_000),
            critical: Duration::from_millis(15_000),
            ping: Duration::from_millis(2_000),
        }
    }
}

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the order API
    pub api_url: String,
    /// Bearer token, obtained elsewhere
    pub api_token: Option<String>,
    pub timeouts: Timeouts,
    pub retry: RetryPolicy,
    pub circuit_threshold: u32,
    pub circuit_reset: Duration,
    pub cache: CacheConfig,
}

impl ClientConfig {
    /// Defaults for everything but the API location.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_token: None,
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            circuit_threshold: 5,
            circuit_reset: Duration::from_millis(60_000),
            cache: CacheConfig::default(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = env::var("COMANDA_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_token = env::var("COMANDA_API_TOKEN").ok().filter(|t| !t.is_empty());

        let defaults = Self::new(api_url);
        let timeouts = Timeouts {
            read: millis("COMANDA_READ_TIMEOUT_MS", defaults.timeouts.read)?,
            write: millis("COMANDA_WRITE_TIMEOUT_MS", defaults.timeouts.write)?,
            critical: millis("COMANDA_CRITICAL_TIMEOUT_MS", defaults.timeouts.critical)?,
            ping: millis("COMANDA_PING_TIMEOUT_MS", defaults.timeouts.ping)?,
        };

        let retry = RetryPolicy {
            max_attempts: parse_var("COMANDA_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            base_delay_ms: parse_var("COMANDA_RETRY_BASE_MS", defaults.retry.base_delay_ms)?,
            max_delay_ms: parse_var("COMANDA_RETRY_MAX_MS", defaults.retry.max_delay_ms)?,
            ..defaults.retry
        };

        let cache = CacheConfig {
            ttl: parse_var("COMANDA_CACHE_TTL_MS", defaults.cache.ttl)?,
            max_items: parse_var("COMANDA_CACHE_MAX_ITEMS", defaults.cache.max_items)?,
            gc_interval: parse_var("COMANDA_GC_INTERVAL_MS", defaults.cache.gc_interval)?,
            stale_threshold: parse_var("COMANDA_CACHE_STALE_MS", defaults.cache.stale_threshold)?,
        };

        Ok(Self {
            api_token,
            timeouts,
            retry,
            circuit_threshold: parse_var("COMANDA_CIRCUIT_THRESHOLD", defaults.circuit_threshold)?,
            circuit_reset: millis("COMANDA_CIRCUIT_RESET_MS", defaults.circuit_reset)?,
            cache,
            ..defaults
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

fn millis(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let ms = parse_var(name, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
