//! TTL Cleanup Task
//!
//! Background task that periodically removes expired entries nobody reads again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheOrchestrator;

/// Spawns a background task that periodically cleans up expired cache entries
/// in both tiers.
///
/// # Arguments
/// * `cache` - Shared cache orchestrator
/// * `interval` - Time between cleanup runs, usually
///   [`CacheOrchestrator::cleanup_interval`]
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(CacheOrchestrator::in_memory(1000, TtlPolicy::default()));
/// let cleanup_handle = spawn_cleanup_task(cache.clone(), cache.cleanup_interval());
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(cache: Arc<CacheOrchestrator>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "starting cache cleanup task");

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.cleanup();

            if removed > 0 {
                info!("cache cleanup: removed {} expired entries", removed);
            } else {
                debug!("cache cleanup: no expired entries found");
            }
        }
    })
}
