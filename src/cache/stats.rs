//! Cache Statistics Module
//!
//! Per-tier counters and the combined view reported by the orchestrator.

use serde::Serialize;

// == Tier Stats ==
/// Counters kept by one cache tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups that returned a value
    pub hits: u64,
    /// Lookups that found nothing, an expired entry or an unreadable record
    pub misses: u64,
    /// Entries removed to make room for a new key
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Persisted records dropped because they could not be decrypted
    pub corrupt: u64,
    /// Entries currently held
    pub total_entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// hits / lookups, or 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.lookups())
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    pub fn record_corrupt(&mut self, count: usize) {
        self.corrupt += count as u64;
    }

    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}

// == Tiered Stats ==
/// Snapshot of both tiers.
///
/// Every memory miss falls through to the persistent tier, so a lookup is
/// served by the cache when either tier hits.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TieredStats {
    pub memory: CacheStats,
    pub persistent: Option<CacheStats>,
}

impl TieredStats {
    /// Lookups answered by memory or promoted from disk.
    pub fn hits(&self) -> u64 {
        self.memory.hits + self.persistent.as_ref().map_or(0, |p| p.hits)
    }

    /// Fraction of lookups answered without the network.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits(), self.memory.lookups())
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}
