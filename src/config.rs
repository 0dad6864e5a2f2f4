//! Configuration Module
//!
//! Handles loading and managing the data-layer configuration from
//! environment variables.

use std::collections::HashMap;
use std::env;

// == Rate Limit Policy ==
/// Window and threshold for one rate-limiter key class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests allowed within one window
    pub max_requests: u32,
}

// == Config ==
/// Data-layer configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL requests are issued against
    pub base_url: String,
    /// Per-attempt timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Maximum attempts per logical request (>= 1)
    pub max_attempts: u32,
    /// Base retry delay in milliseconds (> 0)
    pub base_delay_ms: u64,
    /// Default TTL in milliseconds for cached responses
    pub default_ttl_ms: u64,
    /// Maximum number of entries the response cache holds
    pub max_cache_size: usize,
    /// Reconnect backoff base delay in milliseconds
    pub reconnect_base_delay_ms: u64,
    /// Reconnect backoff cap in milliseconds
    pub reconnect_max_delay_ms: u64,
    /// Reconnect attempts before requiring a manual connect
    pub max_reconnect_attempts: u32,
    /// Default rate-limit policy applied to every key class
    pub rate_limit: RateLimitPolicy,
    /// Per-key-class rate-limit overrides, keyed by "METHOD path"
    pub rate_limit_overrides: HashMap<String, RateLimitPolicy>,
    /// Background cache sweep interval in milliseconds
    pub sweep_interval_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `DATALINK_BASE_URL` - API base URL (default: "http://localhost:8080/api")
    /// - `DATALINK_REQUEST_TIMEOUT_MS` - per-attempt timeout (default: 10000)
    /// - `DATALINK_MAX_ATTEMPTS` - attempts per request (default: 3)
    /// - `DATALINK_BASE_DELAY_MS` - base retry delay (default: 500)
    /// - `DATALINK_DEFAULT_TTL_MS` - default cache TTL (default: 300000)
    /// - `DATALINK_MAX_CACHE_SIZE` - cache capacity (default: 500)
    /// - `DATALINK_RECONNECT_BASE_DELAY_MS` - reconnect base (default: 1000)
    /// - `DATALINK_RECONNECT_MAX_DELAY_MS` - reconnect cap (default: 30000)
    /// - `DATALINK_MAX_RECONNECT_ATTEMPTS` - reconnect budget (default: 8)
    /// - `DATALINK_RATE_WINDOW_MS` - rate-limit window (default: 60000)
    /// - `DATALINK_RATE_MAX_REQUESTS` - requests per window (default: 60)
    /// - `DATALINK_SWEEP_INTERVAL_MS` - cache sweep interval (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env::var("DATALINK_BASE_URL").unwrap_or(defaults.base_url),
            request_timeout_ms: env_parse("DATALINK_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            max_attempts: env_parse("DATALINK_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            base_delay_ms: env_parse("DATALINK_BASE_DELAY_MS", defaults.base_delay_ms).max(1),
            default_ttl_ms: env_parse("DATALINK_DEFAULT_TTL_MS", defaults.default_ttl_ms),
            max_cache_size: env_parse("DATALINK_MAX_CACHE_SIZE", defaults.max_cache_size),
            reconnect_base_delay_ms: env_parse(
                "DATALINK_RECONNECT_BASE_DELAY_MS",
                defaults.reconnect_base_delay_ms,
            ),
            reconnect_max_delay_ms: env_parse(
                "DATALINK_RECONNECT_MAX_DELAY_MS",
                defaults.reconnect_max_delay_ms,
            ),
            max_reconnect_attempts: env_parse(
                "DATALINK_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            rate_limit: RateLimitPolicy {
                window_ms: env_parse("DATALINK_RATE_WINDOW_MS", defaults.rate_limit.window_ms),
                max_requests: env_parse(
                    "DATALINK_RATE_MAX_REQUESTS",
                    defaults.rate_limit.max_requests,
                ),
            },
            rate_limit_overrides: HashMap::new(),
            sweep_interval_ms: env_parse("DATALINK_SWEEP_INTERVAL_MS", defaults.sweep_interval_ms),
        }
    }

    /// Registers a rate-limit override for one key class ("METHOD path").
    pub fn with_rate_override(mut self, key_class: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.rate_limit_overrides.insert(key_class.into(), policy);
        self
    }

    /// Resolves the rate-limit policy for a key class.
    pub fn rate_policy_for(&self, key_class: &str) -> RateLimitPolicy {
        self.rate_limit_overrides
            .get(key_class)
            .copied()
            .unwrap_or(self.rate_limit)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            request_timeout_ms: 10_000,
            max_attempts: 3,
            base_delay_ms: 500,
            default_ttl_ms: 300_000,
            max_cache_size: 500,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 8,
            rate_limit: RateLimitPolicy {
                window_ms: 60_000,
                max_requests: 60,
            },
            rate_limit_overrides: HashMap::new(),
            sweep_interval_ms: 30_000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
