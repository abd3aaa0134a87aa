//! Persistent Tier Module
//!
//! Encrypted on-disk cache backed by a single JSON index file. Writes are
//! coalesced by a debounce task and always rewrite the whole document.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::crypto::RecordCipher;
use crate::cache::entry::{current_timestamp_ms, expiry_from, is_expired_at};
use crate::cache::{CacheStats, CacheTier};
use crate::error::CacheError;

/// File name of the encrypted index inside the cache directory.
pub const INDEX_FILE: &str = "cache.json";

/// File name of the key material inside the cache directory.
pub const KEY_FILE: &str = "cache.key";

// == Persisted Record ==
/// One entry of the on-disk index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    /// Sealed JSON serialization of the cached value
    pub value: String,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: i64,
}

impl PersistedRecord {
    fn is_expired(&self, now: i64) -> bool {
        is_expired_at(self.expires_at, now)
    }
}

type CacheIndex = BTreeMap<String, PersistedRecord>;

#[derive(Debug, Default)]
struct IndexState {
    index: CacheIndex,
    /// Set when the in-memory index differs from the file
    dirty: bool,
    stats: CacheStats,
}

impl IndexState {
    fn prune_expired(&mut self) -> usize {
        let now = current_timestamp_ms();
        let before = self.index.len();
        self.index.retain(|_, record| !record.is_expired(now));
        let removed = before - self.index.len();
        if removed > 0 {
            self.dirty = true;
            self.stats.record_expirations(removed);
        }
        removed
    }
}

#[derive(Debug)]
struct TierShared {
    state: Mutex<IndexState>,
    /// Serializes whole-file rewrites
    write_lock: Mutex<()>,
    cipher: RecordCipher,
    data_path: PathBuf,
}

impl TierShared {
    // == Flush ==
    /// Rewrites the index file if anything changed since the last write.
    fn flush(&self) -> Result<(), CacheError> {
        let _write_guard = self.write_lock.lock();

        let document = {
            let mut state = self.state.lock();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            serde_json::to_vec_pretty(&state.index)?
        };

        if let Err(e) = write_private_file(&self.data_path, &document) {
            self.state.lock().dirty = true;
            return Err(e);
        }

        debug!(path = %self.data_path.display(), bytes = document.len(), "persistent tier flushed");
        Ok(())
    }
}

// == Persistent Tier ==
/// Encrypted, durable cache tier.
///
/// Values are sealed with AES-256-GCM under a key kept in a sibling file.
/// Both files are readable by the owner only.
#[derive(Debug)]
pub struct PersistentTier {
    shared: Arc<TierShared>,
    notify: Arc<Notify>,
    /// Debounce task; `None` when no tokio runtime was available, in which case writes flush inline
    flusher: Mutex<Option<JoinHandle<()>>>,
    default_ttl: Duration,
}

impl PersistentTier {
    // == Constructor ==
    /// Opens (or creates) the tier in `dir`.
    ///
    /// An unreadable index or key file is logged and replaced by an empty
    /// index rather than failing. Only failures to create the directory or
    /// the key file are returned as errors.
    pub fn open(
        dir: impl AsRef<Path>,
        default_ttl: Duration,
        debounce: Duration,
    ) -> Result<Self, CacheError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let cipher = load_or_create_key(&dir.join(KEY_FILE))?;
        let data_path = dir.join(INDEX_FILE);
        let mut stats = CacheStats::new();
        let index = load_index(&data_path, &cipher, &mut stats);
        info!(path = %data_path.display(), entries = index.len(), "persistent tier loaded");

        let shared = Arc::new(TierShared {
            state: Mutex::new(IndexState {
                index,
                dirty: false,
                stats,
            }),
            write_lock: Mutex::new(()),
            cipher,
            data_path,
        });
        let notify = Arc::new(Notify::new());

        let flusher = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(run_flusher(
                shared.clone(),
                notify.clone(),
                debounce,
            ))),
            Err(_) => {
                debug!("no tokio runtime, persistent tier writes will flush inline");
                None
            }
        };

        Ok(Self {
            shared,
            notify,
            flusher: Mutex::new(flusher),
            default_ttl,
        })
    }

    /// Path of the index file.
    pub fn data_path(&self) -> &Path {
        &self.shared.data_path
    }

    /// Writes pending changes now, bypassing the debounce window.
    pub fn flush(&self) -> Result<(), CacheError> {
        self.shared.flush()
    }

    fn schedule_write(&self) {
        if self.flusher.lock().is_some() {
            self.notify.notify_one();
        } else if let Err(e) = self.shared.flush() {
            warn!(error = %e, "persistent tier write failed");
        }
    }

    fn mark_dirty_and_schedule(&self, changed: bool) {
        if changed {
            self.shared.state.lock().dirty = true;
            self.schedule_write();
        }
    }

    fn decode(&self, record: &PersistedRecord) -> Result<Value, CacheError> {
        let plaintext = self.shared.cipher.open(&record.value)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

impl CacheTier for PersistentTier {
    // == Set ==
    /// Seals the value, replaces the record, and schedules a debounced rewrite.
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let plaintext = serde_json::to_vec(&value)?;
        let sealed = self.shared.cipher.seal(&plaintext)?;

        let now = current_timestamp_ms();
        let record = PersistedRecord {
            value: sealed,
            created_at: now,
            expires_at: expiry_from(now, ttl.unwrap_or(self.default_ttl)),
        };

        {
            let mut state = self.shared.state.lock();
            state.index.insert(key.to_string(), record);
            state.dirty = true;
        }
        self.schedule_write();
        Ok(())
    }

    // == Get ==
    /// Decrypts on read. Expired or undecryptable records are dropped.
    fn get(&self, key: &str) -> Option<Value> {
        self.get_with_ttl(key).map(|(value, _)| value)
    }

    /// Remaining lifetime comes from the record's `expiresAt`.
    fn get_with_ttl(&self, key: &str) -> Option<(Value, Option<Duration>)> {
        let record = {
            let mut state = self.shared.state.lock();
            let record = state.index.get(key).cloned();
            if record.is_none() {
                state.stats.record_miss();
            }
            record?
        };

        let now = current_timestamp_ms();
        if record.is_expired(now) {
            let removed = {
                let mut state = self.shared.state.lock();
                state.stats.record_miss();
                state.stats.record_expirations(1);
                state.index.remove(key).is_some()
            };
            self.mark_dirty_and_schedule(removed);
            return None;
        }

        match self.decode(&record) {
            Ok(value) => {
                self.shared.state.lock().stats.record_hit();
                let remaining = Duration::from_millis((record.expires_at - now).max(0) as u64);
                Some((value, Some(remaining)))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "dropping undecryptable persistent record");
                let removed = {
                    let mut state = self.shared.state.lock();
                    state.stats.record_miss();
                    state.stats.record_corrupt(1);
                    state.index.remove(key).is_some()
                };
                self.mark_dirty_and_schedule(removed);
                None
            }
        }
    }

    fn has(&self, key: &str) -> bool {
        let now = current_timestamp_ms();
        let (present, removed) = {
            let mut state = self.shared.state.lock();
            let expired = state.index.get(key).map(|record| record.is_expired(now));
            match expired {
                Some(true) => {
                    state.index.remove(key);
                    state.stats.record_expirations(1);
                    (false, true)
                }
                Some(false) => (true, false),
                None => (false, false),
            }
        };
        self.mark_dirty_and_schedule(removed);
        present
    }

    fn delete(&self, key: &str) -> bool {
        let removed = self.shared.state.lock().index.remove(key).is_some();
        self.mark_dirty_and_schedule(removed);
        removed
    }

    fn clear(&self) {
        let had_entries = {
            let mut state = self.shared.state.lock();
            let had_entries = !state.index.is_empty();
            state.index.clear();
            had_entries
        };
        self.mark_dirty_and_schedule(had_entries);
    }

    fn size(&self) -> usize {
        let (len, removed) = {
            let mut state = self.shared.state.lock();
            let removed = state.prune_expired();
            (state.index.len(), removed)
        };
        if removed > 0 {
            self.schedule_write();
        }
        len
    }

    fn keys(&self) -> Vec<String> {
        let (keys, removed) = {
            let mut state = self.shared.state.lock();
            let removed = state.prune_expired();
            (state.index.keys().cloned().collect(), removed)
        };
        if removed > 0 {
            self.schedule_write();
        }
        keys
    }

    fn cleanup(&self) -> usize {
        let removed = self.shared.state.lock().prune_expired();
        if removed > 0 {
            self.schedule_write();
        }
        removed
    }

    fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let removed = {
            let mut state = self.shared.state.lock();
            let before = state.index.len();
            state.index.retain(|key, _| !pattern.is_match(key));
            before - state.index.len()
        };
        self.mark_dirty_and_schedule(removed > 0);
        removed
    }

    fn stats(&self) -> Option<CacheStats> {
        let state = self.shared.state.lock();
        let mut stats = state.stats.clone();
        stats.set_total_entries(state.index.len());
        Some(stats)
    }

    // == Close ==
    /// Stops the debounce task and flushes pending writes synchronously.
    fn close(&self) -> Result<(), CacheError> {
        if let Some(handle) = self.flusher.lock().take() {
            handle.abort();
        }
        self.shared.flush()
    }
}

impl Drop for PersistentTier {
    fn drop(&mut self) {
        if let Some(handle) = self.flusher.lock().take() {
            handle.abort();
        }
    }
}

// == Debounce Task ==
/// Waits for a write notification, then for a quiet period with no further
/// notifications, then rewrites the index once.
async fn run_flusher(shared: Arc<TierShared>, notify: Arc<Notify>, debounce: Duration) {
    loop {
        notify.notified().await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => break,
                _ = notify.notified() => continue,
            }
        }

        let target = shared.clone();
        match tokio::task::spawn_blocking(move || target.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "debounced persistent write failed"),
            Err(e) => warn!(error = %e, "debounced persistent write task failed"),
        }
    }
}

// == File Helpers ==
/// Writes `contents` to `path` with owner-only permissions.
///
/// The data goes to a temporary sibling first and is renamed into place, so
/// readers never observe a partially written document.
pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
    let tmp_path = path.with_extension("tmp");

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn load_or_create_key(path: &Path) -> Result<RecordCipher, CacheError> {
    if path.exists() {
        let existing = fs::read_to_string(path)
            .map_err(CacheError::from)
            .and_then(|encoded| {
                BASE64
                    .decode(encoded.trim())
                    .map_err(|e| CacheError::Crypto(format!("Key file is not base64: {e}")))
            })
            .and_then(|key| RecordCipher::new(&key));

        match existing {
            Ok(cipher) => return Ok(cipher),
            Err(e) => warn!(path = %path.display(), error = %e, "unusable cache key, generating a new one"),
        }
    }

    let key = RecordCipher::generate_key();
    write_private_file(path, BASE64.encode(&key).as_bytes())?;
    RecordCipher::new(&key)
}

/// Reads the index, counting what had to be discarded into `stats`.
fn load_index(path: &Path, cipher: &RecordCipher, stats: &mut CacheStats) -> CacheIndex {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CacheIndex::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read cache index, starting empty");
            return CacheIndex::new();
        }
    };

    let mut index: CacheIndex = match serde_json::from_slice(&raw) {
        Ok(index) => index,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt cache index, starting empty");
            return CacheIndex::new();
        }
    };

    let now = current_timestamp_ms();
    let before = index.len();
    index.retain(|_, record| !record.is_expired(now));
    let expired = before - index.len();

    let before = index.len();
    index.retain(|_, record| cipher.open(&record.value).is_ok());
    let corrupt = before - index.len();

    if expired + corrupt > 0 {
        warn!(expired, corrupt, "discarded records from cache index");
    }
    stats.record_expirations(expired);
    stats.record_corrupt(corrupt);

    index
}
