//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a client is alive.
//!
//! # Tasks
//! - TTL Cleanup: Removes expired entries from both cache tiers

mod cleanup;

pub use cleanup::spawn_cleanup_task;
