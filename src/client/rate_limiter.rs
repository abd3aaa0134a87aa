//! Rate Limiter Module
//!
//! Paces outbound calls with a minimum interval, a rolling burst window and
//! random jitter. Limits are enforced by delaying callers, never by rejecting them.

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::debug;

use crate::config::RateLimitConfig;

#[derive(Debug, Default)]
struct RateWindow {
    /// Call timestamps inside the rolling window, oldest first
    calls: VecDeque<Instant>,
    last_call: Option<Instant>,
}

impl RateWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.calls.front() {
            if now.duration_since(*oldest) >= window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }
}

// == Rate Limiter ==
/// Outbound call pacer.
///
/// Callers are served one at a time in arrival order: the window lock is held
/// across the waits, so concurrent `acquire` calls queue behind each other.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: Mutex::new(RateWindow::default()),
        }
    }

    // == Acquire ==
    /// Suspends until another call may be issued, then records it.
    pub async fn acquire(&self) {
        let mut state = self.window.lock().await;
        let burst_limit = self.config.burst_limit.max(1);

        state.prune(Instant::now(), self.config.window);
        if state.calls.len() >= burst_limit {
            if let Some(oldest) = state.calls.front().copied() {
                let resume_at = oldest + self.config.window + self.config.safety_margin;
                debug!(
                    wait_ms = resume_at
                        .saturating_duration_since(Instant::now())
                        .as_millis() as u64,
                    "burst limit reached, waiting for window"
                );
                sleep_until(resume_at).await;
            }
            state.prune(Instant::now(), self.config.window);
        }

        if let Some(last_call) = state.last_call {
            let elapsed = Instant::now().duration_since(last_call);
            if elapsed < self.config.min_interval {
                sleep(self.config.min_interval - elapsed).await;
            }
        }

        let jitter = self.jitter();
        if !jitter.is_zero() {
            sleep(jitter).await;
        }

        let now = Instant::now();
        state.calls.push_back(now);
        state.last_call = Some(now);
    }

    /// Number of calls currently counted against the burst window.
    pub async fn calls_in_window(&self) -> usize {
        let mut state = self.window.lock().await;
        state.prune(Instant::now(), self.config.window);
        state.calls.len()
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.config.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
        }
    }
}
