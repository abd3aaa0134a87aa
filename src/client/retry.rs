//! Retry Policy Module
//!
//! Decides whether a failed attempt is retried and how long to wait first.

use std::time::Duration;

use rand::Rng;

use crate::config::ExecutorConfig;
use crate::error::ApiError;

/// Jitter never exceeds this fraction of the computed delay.
const JITTER_DIVISOR: u32 = 10;

// == Retry Policy ==
/// Capped exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutorConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            max_retries: config.retries,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
        }
    }

    /// True when `error` may be retried after `attempt` retries already made.
    pub fn should_retry(&self, error: &ApiError, attempt: u32, max_retries: u32) -> bool {
        error.is_retryable() && attempt < max_retries
    }

    // == Backoff ==
    /// Backoff before retry number `attempt + 1`.
    ///
    /// A server retry-after hint is used as is. Otherwise the delay is
    /// `base * 2^attempt`, capped at `max_delay`, plus up to 10% jitter.
    pub fn delay_for(&self, attempt: u32, error: &ApiError) -> Duration {
        if let Some(hint) = error.retry_after() {
            return hint;
        }

        let backoff = self.backoff(attempt);
        let jitter_cap = (backoff / JITTER_DIVISOR).as_millis() as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        backoff + Duration::from_millis(jitter)
    }

    /// Exponential component without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
