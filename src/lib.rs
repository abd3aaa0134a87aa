//! Query Cache - client-side request cache and execution orchestrator
//!
//! Sits between an application and a remote query API: two-tier caching with
//! an encrypted disk tier, deduplication of identical in-flight requests,
//! bounded concurrency, rate limiting, retries and write-driven invalidation.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod tasks;
pub mod telemetry;

pub use cache::{CacheOrchestrator, CacheTier};
pub use client::{Operation, QueryContext, RequestExecutor, RequestOptions};
pub use config::Config;
pub use error::{ApiError, CacheError, Result};
pub use tasks::spawn_cleanup_task;
