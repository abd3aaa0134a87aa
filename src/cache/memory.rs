//! Memory Tier Module
//!
//! Bounded in-process cache with per-entry TTL and creation-order eviction.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheEntry, CacheStats, CacheTier};
use crate::error::CacheError;

#[derive(Debug)]
struct Slot {
    /// Insertion sequence, breaks ties between entries created in the same millisecond
    seq: u64,
    entry: CacheEntry,
}

#[derive(Debug, Default)]
struct MemoryState {
    slots: HashMap<String, Slot>,
    next_seq: u64,
    stats: CacheStats,
}

impl MemoryState {
    fn remove_expired(&mut self, key: &str) -> bool {
        let expired = self
            .slots
            .get(key)
            .map(|slot| slot.entry.is_expired())
            .unwrap_or(false);
        if expired {
            self.slots.remove(key);
            self.stats.record_expirations(1);
        }
        expired
    }

    fn oldest_key(&self) -> Option<String> {
        self.slots
            .iter()
            .min_by_key(|(_, slot)| (slot.entry.created_at, slot.seq))
            .map(|(key, _)| key.clone())
    }
}

// == Memory Tier ==
/// In-memory cache tier.
///
/// When full, inserting a new key evicts the entry with the oldest creation
/// time. Reads do not refresh eviction priority; overwriting a key does.
#[derive(Debug)]
pub struct MemoryTier {
    state: Mutex<MemoryState>,
    /// Maximum number of entries allowed
    max_entries: usize,
    /// TTL used when `set` is called without one
    default_ttl: Duration,
}

impl MemoryTier {
    // == Constructor ==
    /// Creates a new MemoryTier with specified capacity and default TTL.
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            max_entries: max_entries.max(1),
            default_ttl,
        }
    }
}

impl CacheTier for MemoryTier {
    // == Set ==
    /// Stores a value, evicting the oldest entry first if the tier is full.
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut state = self.state.lock();

        let is_overwrite = state.slots.contains_key(key);
        if !is_overwrite && state.slots.len() >= self.max_entries {
            if let Some(evicted) = state.oldest_key() {
                state.slots.remove(&evicted);
                state.stats.record_eviction();
                debug!(key = %evicted, "memory tier evicted oldest entry");
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
        state.slots.insert(key.to_string(), Slot { seq, entry });

        let len = state.slots.len();
        state.stats.set_total_entries(len);
        Ok(())
    }

    // == Get ==
    /// Retrieves a value; expired entries are removed and counted as misses.
    fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.state.lock();

        if state.remove_expired(key) {
            state.stats.record_miss();
            return None;
        }

        let value = state.slots.get(key).map(|slot| slot.entry.value.clone());
        match value {
            Some(value) => {
                state.stats.record_hit();
                Some(value)
            }
            None => {
                state.stats.record_miss();
                None
            }
        }
    }

    fn has(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        !state.remove_expired(key) && state.slots.contains_key(key)
    }

    fn delete(&self, key: &str) -> bool {
        self.state.lock().slots.remove(key).is_some()
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.stats.set_total_entries(0);
    }

    fn size(&self) -> usize {
        self.state.lock().slots.len()
    }

    fn keys(&self) -> Vec<String> {
        self.state.lock().slots.keys().cloned().collect()
    }

    // == Cleanup Expired ==
    /// Removes all expired entries and returns how many were dropped.
    fn cleanup(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.slots.len();
        state.slots.retain(|_, slot| !slot.entry.is_expired());
        let removed = before - state.slots.len();

        state.stats.record_expirations(removed);
        let len = state.slots.len();
        state.stats.set_total_entries(len);
        removed
    }

    fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let mut state = self.state.lock();
        let before = state.slots.len();
        state.slots.retain(|key, _| !pattern.is_match(key));
        before - state.slots.len()
    }

    // == Stats ==
    /// Returns current cache statistics.
    fn stats(&self) -> Option<CacheStats> {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.set_total_entries(state.slots.len());
        Some(stats)
    }
}
