//! Versioned key/value cache with lazy TTL expiry and size-bounded eviction,
//! layered over a [`KeyValueStore`].
//!
//! Entries live under [`CACHE_PREFIX`]; hit/miss counters and size totals are
//! persisted next to them so they survive restarts. Eviction orders by write
//! time, not access time, so a frequently read but old entry still goes first.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::storage::KeyValueStore;

/// Prefix for cached values.
pub const CACHE_PREFIX: &str = "flowcast.cache.";
/// Prefix for cache bookkeeping such as the persisted counters.
pub const CACHE_META_PREFIX: &str = "flowcast.cache-meta.";
const STATS_KEY: &str = "flowcast.cache-meta.stats";

/// Whether a storage key belongs to the cache rather than application data.
pub fn is_cache_key(key: &str) -> bool {
    key.starts_with(CACHE_PREFIX) || key.starts_with(CACHE_META_PREFIX)
}

/// Millisecond wall clock the cache stamps entries with.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Falls back to [`CacheConfig::default_ttl`] when unset.
    pub ttl: Option<Duration>,
    /// Recorded with the entry; eviction order does not consult it.
    pub priority: CachePriority,
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T = serde_json::Value> {
    pub value: T,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub version: String,
    pub size_bytes: usize,
    #[serde(default)]
    pub priority: CachePriority,
}

/// Entry header without the value, for sweeps and eviction.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryMeta {
    created_at: i64,
    expires_at: Option<i64>,
    version: String,
    size_bytes: usize,
}

impl EntryMeta {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_size: usize,
    pub item_count: usize,
    pub last_cleanup: Option<i64>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

pub struct CacheLayer<S: KeyValueStore> {
    store: S,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl<S: KeyValueStore> CacheLayer<S> {
    pub fn open(store: S, config: CacheConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Open the cache, sweeping it first if the last sweep is older than
    /// `config.cleanup_interval`.
    pub fn with_clock(store: S, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let cache = Self {
            store,
            config,
            clock,
        };
        let interval = i64::try_from(cache.config.cleanup_interval.as_millis()).unwrap_or(i64::MAX);
        let due = cache
            .load_stats()
            .last_cleanup
            .map_or(true, |last| cache.now().saturating_sub(last) > interval);
        if due {
            cache.cleanup();
        }
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    fn entry_key(key: &str) -> String {
        format!("{CACHE_PREFIX}{key}")
    }

    /// Fetch a value. Missing, expired, corrupt and wrong-version entries
    /// all read as `None`; the last three are deleted on the way.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let storage_key = Self::entry_key(key);
        let raw = match self.store.get_item(&storage_key) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed");
                return None;
            }
        };
        let Some(raw) = raw else {
            self.update_stats(|s| s.misses += 1);
            return None;
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding corrupt cache entry");
                self.discard(&storage_key, None);
                self.update_stats(|s| s.misses += 1);
                return None;
            }
        };

        if entry.version != self.config.schema_version {
            tracing::debug!(key, version = %entry.version, "dropping cache entry from older schema");
            self.discard(&storage_key, Some(entry.size_bytes));
            self.update_stats(|s| s.misses += 1);
            return None;
        }

        if entry.expires_at.is_some_and(|at| self.now() >= at) {
            self.discard(&storage_key, Some(entry.size_bytes));
            self.update_stats(|s| s.misses += 1);
            return None;
        }

        match serde_json::from_value(entry.value) {
            Ok(value) => {
                self.update_stats(|s| s.hits += 1);
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cached value has unexpected shape");
                self.discard(&storage_key, Some(entry.size_bytes));
                self.update_stats(|s| s.misses += 1);
                None
            }
        }
    }

    /// Store a value. Returns `false` when the value cannot be serialized,
    /// is larger than half the cache, or the write fails.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, options: SetOptions) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache value not serializable");
                return false;
            }
        };
        let size = value.to_string().len();
        if size > self.config.max_size_bytes / 2 {
            tracing::debug!(key, size, "cache value too large, not stored");
            return false;
        }

        let storage_key = Self::entry_key(key);
        if let Some(previous) = self.read_meta(&storage_key) {
            self.discard(&storage_key, previous.map(|m| m.size_bytes));
        }

        let mut stats = self.load_stats();
        if stats.total_size + size > self.config.max_size_bytes {
            self.evict(size, &mut stats);
        }

        let now = self.now();
        let ttl = options.ttl.or(self.config.default_ttl);
        let entry = CacheEntry {
            value,
            created_at: now,
            expires_at: ttl.map(|t| now.saturating_add(i64::try_from(t.as_millis()).unwrap_or(i64::MAX))),
            version: self.config.schema_version.clone(),
            size_bytes: size,
            priority: options.priority,
        };

        let written = serde_json::to_string(&entry)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                self.store
                    .set_item(&storage_key, &json)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = written {
            tracing::warn!(key, error = %e, "cache write failed");
            self.save_stats(&stats);
            return false;
        }

        stats.total_size += size;
        stats.item_count += 1;
        self.save_stats(&stats);
        true
    }

    /// Delete one entry. Returns whether anything was removed.
    pub fn remove(&self, key: &str) -> bool {
        let storage_key = Self::entry_key(key);
        match self.read_meta(&storage_key) {
            Some(meta) => self.discard(&storage_key, meta.map(|m| m.size_bytes)),
            None => false,
        }
    }

    /// Drop expired, corrupt and wrong-version entries and recount totals.
    /// Returns how many entries were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.now();
        let mut stats = self.load_stats();
        let mut stale = Vec::new();
        stats.total_size = 0;
        stats.item_count = 0;

        for (key, meta) in self.scan() {
            match meta {
                Some(m) if !m.is_expired(now) && m.version == self.config.schema_version => {
                    stats.total_size += m.size_bytes;
                    stats.item_count += 1;
                }
                _ => stale.push(key),
            }
        }

        if !stale.is_empty() {
            if let Err(e) = self.store.multi_remove(&stale) {
                tracing::warn!(error = %e, "cache sweep could not remove stale entries");
            }
        }
        stats.last_cleanup = Some(now);
        self.save_stats(&stats);
        tracing::info!(removed = stale.len(), remaining = stats.item_count, "cache sweep finished");
        stale.len()
    }

    /// Remove every cache entry and reset the counters.
    pub fn clear(&self) {
        let mut keys: Vec<String> = self.scan().into_iter().map(|(k, _)| k).collect();
        keys.push(STATS_KEY.to_owned());
        if let Err(e) = self.store.multi_remove(&keys) {
            tracing::warn!(error = %e, "cache clear failed");
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.load_stats()
    }

    /// Free at least `needed` bytes: expired and unreadable entries first,
    /// then oldest writes.
    fn evict(&self, needed: usize, stats: &mut CacheStats) {
        let now = self.now();
        let mut candidates = self.scan();
        stats.total_size = candidates
            .iter()
            .filter_map(|(_, m)| m.as_ref().map(|m| m.size_bytes))
            .sum();
        stats.item_count = candidates.len();

        candidates.sort_by_key(|(_, meta)| match meta {
            None => (0, i64::MIN),
            Some(m) if m.is_expired(now) => (1, m.created_at),
            Some(m) => (2, m.created_at),
        });

        let mut freed = 0;
        for (key, meta) in candidates {
            if freed >= needed && stats.total_size + needed <= self.config.max_size_bytes {
                break;
            }
            if let Err(e) = self.store.remove_item(&key) {
                tracing::warn!(key = %key, error = %e, "cache eviction failed");
                continue;
            }
            let size = meta.map_or(0, |m| m.size_bytes);
            freed += size;
            stats.total_size = stats.total_size.saturating_sub(size);
            stats.item_count = stats.item_count.saturating_sub(1);
            tracing::debug!(key = %key, size, "evicted cache entry");
        }
    }

    /// All cache entries with their headers; `None` marks an unreadable entry.
    fn scan(&self) -> Vec<(String, Option<EntryMeta>)> {
        let keys = match self.store.get_all_keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "cache key listing failed");
                return Vec::new();
            }
        };
        keys.into_iter()
            .filter(|k| k.starts_with(CACHE_PREFIX))
            .map(|k| {
                let meta = self.read_meta(&k).flatten();
                (k, meta)
            })
            .collect()
    }

    /// `None` if absent, `Some(None)` if present but unreadable.
    fn read_meta(&self, storage_key: &str) -> Option<Option<EntryMeta>> {
        let raw = self.store.get_item(storage_key).ok().flatten()?;
        Some(serde_json::from_str(&raw).ok())
    }

    fn discard(&self, storage_key: &str, size: Option<usize>) -> bool {
        if let Err(e) = self.store.remove_item(storage_key) {
            tracing::warn!(key = storage_key, error = %e, "cache delete failed");
            return false;
        }
        self.update_stats(|s| {
            s.total_size = s.total_size.saturating_sub(size.unwrap_or(0));
            s.item_count = s.item_count.saturating_sub(1);
        });
        true
    }

    fn load_stats(&self) -> CacheStats {
        match self.store.get_item(STATS_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "resetting corrupt cache stats");
                CacheStats::default()
            }),
            Ok(None) => CacheStats::default(),
            Err(e) => {
                tracing::warn!(error = %e, "cache stats read failed");
                CacheStats::default()
            }
        }
    }

    fn save_stats(&self, stats: &CacheStats) {
        let result = serde_json::to_string(stats)
            .map_err(|e| e.to_string())
            .and_then(|json| self.store.set_item(STATS_KEY, &json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::warn!(error = %e, "cache stats write failed");
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut CacheStats)) {
        let mut stats = self.load_stats();
        f(&mut stats);
        self.save_stats(&stats);
    }
}
