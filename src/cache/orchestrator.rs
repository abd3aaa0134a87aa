//! Cache Orchestrator Module
//!
//! Composes the memory and persistent tiers into one logical cache with
//! operation-aware TTLs and invalidation.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{
    cache_key, operation_of, CacheTier, MemoryTier, PersistentTier, TieredStats, TtlPolicy,
};
use crate::config::CacheConfig;
use crate::error::CacheError;

/// The persistent tier keeps entries this many times longer than the memory tier.
const PERSISTENT_TTL_FACTOR: u32 = 2;

// == Cache Orchestrator ==
/// Two-tier cache.
///
/// Reads go to memory first and fall back to the persistent tier, promoting
/// hits. Writes go to both tiers, the persistent copy living twice as long.
pub struct CacheOrchestrator {
    memory: Arc<dyn CacheTier>,
    persistent: Option<Arc<dyn CacheTier>>,
    ttl_policy: TtlPolicy,
}

impl std::fmt::Debug for CacheOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOrchestrator")
            .field("persistent", &self.persistent.is_some())
            .field("ttl_policy", &self.ttl_policy)
            .finish()
    }
}

impl CacheOrchestrator {
    // == Constructors ==
    /// Creates an orchestrator over arbitrary tiers.
    pub fn new(
        memory: Arc<dyn CacheTier>,
        persistent: Option<Arc<dyn CacheTier>>,
        ttl_policy: TtlPolicy,
    ) -> Self {
        Self {
            memory,
            persistent,
            ttl_policy,
        }
    }

    /// Memory-only cache, used when nothing should touch the disk.
    pub fn in_memory(max_entries: usize, ttl_policy: TtlPolicy) -> Self {
        let memory = MemoryTier::new(max_entries, ttl_policy.shortest());
        Self::new(Arc::new(memory), None, ttl_policy)
    }

    /// Builds the tiers described by `config`. The persistent tier is only
    /// created when a cache directory is configured.
    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let memory = Arc::new(MemoryTier::new(config.max_entries, config.default_ttl));

        let persistent: Option<Arc<dyn CacheTier>> = match &config.cache_dir {
            Some(dir) => Some(Arc::new(PersistentTier::open(
                dir,
                config.default_ttl.saturating_mul(PERSISTENT_TTL_FACTOR),
                config.write_debounce,
            )?)),
            None => None,
        };

        info!(
            max_entries = config.max_entries,
            persistent = persistent.is_some(),
            "cache orchestrator initialized"
        );
        Ok(Self::new(memory, persistent, config.ttl_policy.clone()))
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl_policy
    }

    /// TTL applied to results of `operation`.
    pub fn ttl_for_operation(&self, operation: &str) -> Duration {
        self.ttl_policy.ttl_for(operation)
    }

    /// Interval of the background cleanup task: half the shortest TTL.
    pub fn cleanup_interval(&self) -> Duration {
        (self.ttl_policy.shortest() / 2).max(Duration::from_millis(1))
    }

    /// Counters of both tiers.
    pub fn stats(&self) -> TieredStats {
        TieredStats {
            memory: self.memory.stats().unwrap_or_default(),
            persistent: self.persistent.as_ref().and_then(|p| p.stats()),
        }
    }

    // == Get ==
    /// Reads through memory then the persistent tier, promoting persistent hits.
    ///
    /// A promoted entry never outlives the persistent record it came from.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.memory.get(key) {
            return Some(value);
        }

        let (value, remaining) = self.persistent.as_ref()?.get_with_ttl(key)?;
        let operation_ttl = self.ttl_for_operation(operation_of(key));
        let ttl = remaining.map_or(operation_ttl, |left| left.min(operation_ttl));
        if let Err(e) = self.memory.set(key, value.clone(), Some(ttl)) {
            warn!(key = %key, error = %e, "failed to promote persistent hit");
        }
        debug!(key = %key, "promoted persistent hit into memory");
        Some(value)
    }

    // == Set ==
    /// Writes to both tiers.
    ///
    /// `None` resolves the TTL from the operation name embedded in the key.
    /// The memory write happens first, so a persistent failure still leaves
    /// the value readable for this process.
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let ttl = ttl.unwrap_or_else(|| self.ttl_for_operation(operation_of(key)));

        match &self.persistent {
            Some(persistent) => {
                self.memory.set(key, value.clone(), Some(ttl))?;
                persistent.set(key, value, Some(ttl.saturating_mul(PERSISTENT_TTL_FACTOR)))
            }
            None => self.memory.set(key, value, Some(ttl)),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.memory.has(key) || self.persistent.as_ref().is_some_and(|p| p.has(key))
    }

    /// Removes `key` from both tiers; true if either held it.
    pub fn delete(&self, key: &str) -> bool {
        let in_memory = self.memory.delete(key);
        let on_disk = self.persistent.as_ref().is_some_and(|p| p.delete(key));
        in_memory || on_disk
    }

    pub fn clear(&self) {
        self.memory.clear();
        if let Some(persistent) = &self.persistent {
            persistent.clear();
        }
    }

    /// Number of distinct live keys across both tiers.
    pub fn size(&self) -> usize {
        self.keys().len()
    }

    /// Distinct live keys across both tiers, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: BTreeSet<String> = self.memory.keys().into_iter().collect();
        if let Some(persistent) = &self.persistent {
            keys.extend(persistent.keys());
        }
        keys.into_iter().collect()
    }

    // == Cleanup ==
    /// Drops expired entries from both tiers, returning the total removed.
    pub fn cleanup(&self) -> usize {
        let memory_removed = self.memory.cleanup();
        let persistent_removed = self.persistent.as_ref().map_or(0, |p| p.cleanup());
        memory_removed + persistent_removed
    }

    // == Invalidate Pattern ==
    /// Removes every key matching the regular expression `pattern` from both
    /// tiers. Returns the number of distinct keys removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let regex = Regex::new(pattern)?;
        Ok(self.invalidate_regex(&regex))
    }

    /// Same as [`CacheOrchestrator::invalidate_pattern`] with a compiled expression.
    pub fn invalidate_regex(&self, regex: &Regex) -> usize {
        let matching = self
            .keys()
            .into_iter()
            .filter(|key| regex.is_match(key))
            .count();

        self.memory.invalidate_pattern(regex);
        if let Some(persistent) = &self.persistent {
            persistent.invalidate_pattern(regex);
        }

        if matching > 0 {
            debug!(pattern = %regex, removed = matching, "invalidated cache keys");
        }
        matching
    }

    // == Get Or Set ==
    /// Returns the cached value or runs `factory` once and caches its result.
    ///
    /// Concurrent callers are not coalesced here; a failure to store the
    /// produced value is logged and the value is still returned.
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        ttl: Option<Duration>,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = factory().await?;
        if let Err(e) = self.set(key, value.clone(), ttl) {
            warn!(key = %key, error = %e, "failed to cache computed value");
        }
        Ok(value)
    }

    // == Operation Helpers ==
    /// Read-through caching of one operation call under its derived key and TTL.
    pub async fn cache_operation<F, Fut, E>(
        &self,
        operation: &str,
        params: &Value,
        factory: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let key = cache_key(operation, params);
        let ttl = self.ttl_for_operation(operation);
        self.get_or_set(&key, factory, Some(ttl)).await
    }

    /// Invalidates one operation call, or with `params = None` every key
    /// whose operation name starts with `operation`.
    pub fn invalidate_operation(&self, operation: &str, params: Option<&Value>) -> usize {
        match params {
            Some(params) => usize::from(self.delete(&cache_key(operation, params))),
            None => {
                let pattern = format!("^{}", regex::escape(operation));
                match Regex::new(&pattern) {
                    Ok(regex) => self.invalidate_regex(&regex),
                    Err(e) => {
                        warn!(operation = %operation, error = %e, "cannot build invalidation pattern");
                        0
                    }
                }
            }
        }
    }

    /// Flushes the persistent tier.
    pub fn close(&self) -> Result<(), CacheError> {
        match &self.persistent {
            Some(persistent) => persistent.close(),
            None => Ok(()),
        }
    }
}
