//! Cache Module
//!
//! Two-tier caching: a bounded in-memory tier in front of an encrypted
//! on-disk tier, composed by [`CacheOrchestrator`].

mod crypto;
mod entry;
mod key;
mod memory;
mod orchestrator;
mod persistent;
mod stats;
mod ttl;

#[cfg(test)]
mod property_tests;

use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::error::CacheError;

// Re-export public types
pub use crypto::RecordCipher;
pub use entry::CacheEntry;
pub use key::{cache_key, canonicalize, operation_of};
pub use memory::MemoryTier;
pub use orchestrator::CacheOrchestrator;
pub use persistent::{PersistedRecord, PersistentTier, INDEX_FILE, KEY_FILE};
pub use stats::{CacheStats, TieredStats};
pub use ttl::{TtlPolicy, TtlRule};

// == Cache Tier Trait ==
/// Contract shared by every cache layer.
///
/// Implementations use interior locking so a tier can be shared behind an
/// `Arc` and called from any task. No method blocks on the network.
pub trait CacheTier: Send + Sync {
    /// Stores `value`, replacing any previous entry. `None` uses the tier's default TTL.
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Returns the value if present and not expired. Expired entries are removed.
    fn get(&self, key: &str) -> Option<Value>;

    /// Like [`CacheTier::get`], also returning how long the entry has left.
    /// `None` means the tier does not know.
    fn get_with_ttl(&self, key: &str) -> Option<(Value, Option<Duration>)> {
        self.get(key).map(|value| (value, None))
    }

    fn has(&self, key: &str) -> bool;

    /// Removes an entry, returning whether it existed.
    fn delete(&self, key: &str) -> bool;

    fn clear(&self);

    fn size(&self) -> usize;

    fn keys(&self) -> Vec<String>;

    /// Drops every expired entry and returns how many were removed.
    fn cleanup(&self) -> usize;

    /// Drops every key matching `pattern` and returns how many were removed.
    fn invalidate_pattern(&self, pattern: &Regex) -> usize;

    /// Hit/miss counters, for tiers that track them.
    fn stats(&self) -> Option<CacheStats> {
        None
    }

    /// Persists outstanding writes. A no-op for volatile tiers.
    fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
