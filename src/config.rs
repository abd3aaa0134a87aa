//! Configuration Module
//!
//! Handles loading and managing client configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::TtlPolicy;

/// Cache configuration parameters.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries the memory tier can hold
    pub max_entries: usize,
    /// TTL for entries set without an explicit TTL
    pub default_ttl: Duration,
    /// Directory holding the encrypted index and key file; `None` disables the persistent tier
    pub cache_dir: Option<PathBuf>,
    /// Quiet period before pending persistent writes hit the disk
    pub write_debounce: Duration,
    /// Operation-category TTL table
    pub ttl_policy: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: Duration::from_secs(300),
            cache_dir: None,
            write_debounce: Duration::from_secs(1),
            ttl_policy: TtlPolicy::default(),
        }
    }
}

/// Outbound pacing parameters.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum time between two calls
    pub min_interval: Duration,
    /// Maximum calls inside the rolling window
    pub burst_limit: usize,
    /// Length of the rolling window
    pub window: Duration,
    /// Extra wait once the oldest call leaves a full window
    pub safety_margin: Duration,
    /// Upper bound of the random delay added to every acquire
    pub max_jitter: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(250),
            burst_limit: 5,
            window: Duration::from_secs(60),
            safety_margin: Duration::from_millis(50),
            max_jitter: Duration::from_millis(50),
        }
    }
}

/// Request execution parameters.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Remote query endpoint
    pub endpoint: String,
    /// Maximum number of requests running at once
    pub max_concurrent: usize,
    /// Retries after the first attempt for retryable failures
    pub retries: u32,
    /// Per-call network timeout
    pub timeout: Duration,
    /// First backoff step; doubled on every retry
    pub base_delay: Duration,
    /// Cap on a single backoff wait
    pub max_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/graphql".to_string(),
            max_concurrent: 3,
            retries: 3,
            timeout: Duration::from_secs(30),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Client configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub executor: ExecutorConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `QUERY_API_ENDPOINT` - Remote endpoint (default: http://localhost:8080/graphql)
    /// - `CACHE_MAX_ENTRIES` - Maximum memory tier entries (default: 1000)
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `CACHE_DIR` - Persistent tier directory (default: unset, memory only)
    /// - `CACHE_WRITE_DEBOUNCE_MS` - Persistent write debounce (default: 1000)
    /// - `RATE_LIMIT_MIN_INTERVAL_MS` - Minimum call spacing (default: 250)
    /// - `RATE_LIMIT_BURST` - Calls per 60 second window (default: 5)
    /// - `MAX_CONCURRENT_REQUESTS` - Concurrency gate size (default: 3)
    /// - `REQUEST_RETRIES` - Retries for transient failures (default: 3)
    /// - `REQUEST_TIMEOUT_SECS` - Network timeout (default: 30)
    /// - `RETRY_BASE_DELAY_MS` - First backoff step (default: 1000)
    /// - `RETRY_MAX_DELAY_SECS` - Backoff cap (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            cache: CacheConfig {
                max_entries: env_or("CACHE_MAX_ENTRIES", defaults.cache.max_entries),
                default_ttl: Duration::from_secs(env_or(
                    "CACHE_DEFAULT_TTL",
                    defaults.cache.default_ttl.as_secs(),
                )),
                cache_dir: env::var("CACHE_DIR")
                    .ok()
                    .filter(|v| !v.is_empty())
                    .map(PathBuf::from),
                write_debounce: Duration::from_millis(env_or(
                    "CACHE_WRITE_DEBOUNCE_MS",
                    defaults.cache.write_debounce.as_millis() as u64,
                )),
                ttl_policy: defaults.cache.ttl_policy,
            },
            rate_limit: RateLimitConfig {
                min_interval: Duration::from_millis(env_or(
                    "RATE_LIMIT_MIN_INTERVAL_MS",
                    defaults.rate_limit.min_interval.as_millis() as u64,
                )),
                burst_limit: env_or("RATE_LIMIT_BURST", defaults.rate_limit.burst_limit),
                ..defaults.rate_limit
            },
            executor: ExecutorConfig {
                endpoint: env::var("QUERY_API_ENDPOINT").unwrap_or(defaults.executor.endpoint),
                max_concurrent: env_or("MAX_CONCURRENT_REQUESTS", defaults.executor.max_concurrent),
                retries: env_or("REQUEST_RETRIES", defaults.executor.retries),
                timeout: Duration::from_secs(env_or(
                    "REQUEST_TIMEOUT_SECS",
                    defaults.executor.timeout.as_secs(),
                )),
                base_delay: Duration::from_millis(env_or(
                    "RETRY_BASE_DELAY_MS",
                    defaults.executor.base_delay.as_millis() as u64,
                )),
                max_delay: Duration::from_secs(env_or(
                    "RETRY_MAX_DELAY_SECS",
                    defaults.executor.max_delay.as_secs(),
                )),
            },
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
