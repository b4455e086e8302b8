//! Persisted translation cache with coarse whole-cache expiry.
//! Key: blake3 hex of (normalized text | source or "auto" | target).
//! A single timestamp, refreshed on every `put`, governs all entries: once it
//! falls outside the TTL the whole cache is dropped, never single entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::normalize::normalize_for_key;
use crate::language::normalize_code;
use crate::storage::{now_unix_ms, KeyValueStore};

/// Storage key of the serialized snapshot.
pub const CACHE_STORAGE_KEY: &str = "translation-cache";

/// Default expiry window: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);

/// Source key component when the caller did not name a source language.
const AUTO_SOURCE: &str = "auto";

/// Persisted form: `{ "entries": {...}, "timestamp": <unix ms> }`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CacheSnapshot {
    entries: HashMap<String, String>,
    timestamp: i64,
}

pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub struct TranslationCache {
    inner: Mutex<CacheSnapshot>,
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    clock: Clock,
}

impl TranslationCache {
    /// Load the persisted snapshot. Stale, corrupt or unreadable snapshots
    /// yield an empty cache.
    pub fn load(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self::load_with_clock(store, ttl, Arc::new(now_unix_ms))
    }

    pub fn load_with_clock(store: Arc<dyn KeyValueStore>, ttl: Duration, clock: Clock) -> Self {
        let cache = Self {
            inner: Mutex::new(CacheSnapshot::default()),
            store,
            ttl,
            clock,
        };

        match cache.store.get(CACHE_STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<CacheSnapshot>(&raw) {
                Ok(snapshot) if cache.is_fresh(snapshot.timestamp) => {
                    info!(entries = snapshot.entries.len(), "translation cache loaded");
                    *cache.inner.lock() = snapshot;
                }
                Ok(snapshot) => {
                    info!(entries = snapshot.entries.len(), "translation cache expired, dropping");
                    cache.remove_persisted();
                }
                Err(e) => {
                    warn!(error = %e, "translation cache snapshot corrupt, dropping");
                    cache.remove_persisted();
                }
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "translation cache load failed, starting empty"),
        }

        cache
    }

    /// Compute the cache key from translation parameters.
    pub fn compute_key(text: &str, source_lang: Option<&str>, target_lang: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalize_for_key(text).as_bytes());
        hasher.update(b"|");
        let source = source_lang.map(normalize_code);
        hasher.update(source.as_deref().unwrap_or(AUTO_SOURCE).as_bytes());
        hasher.update(b"|");
        hasher.update(normalize_code(target_lang).as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Look up a cached translation. An expired cache is purged and reports a miss.
    pub fn get(&self, text: &str, source_lang: Option<&str>, target_lang: &str) -> Option<String> {
        let key = Self::compute_key(text, source_lang, target_lang);
        let mut inner = self.inner.lock();
        if inner.entries.is_empty() {
            return None;
        }
        if !self.is_fresh(inner.timestamp) {
            debug!(entries = inner.entries.len(), "translation cache expired on read, purging");
            *inner = CacheSnapshot::default();
            drop(inner);
            self.remove_persisted();
            return None;
        }
        inner.entries.get(&key).cloned()
    }

    /// Insert or overwrite an entry, refresh the cache timestamp, persist.
    pub fn put(&self, text: &str, source_lang: Option<&str>, target_lang: &str, translated: &str) {
        let key = Self::compute_key(text, source_lang, target_lang);
        let serialized = {
            let mut inner = self.inner.lock();
            inner.entries.insert(key, translated.to_string());
            inner.timestamp = (self.clock)();
            serde_json::to_string(&*inner)
        };
        match serialized {
            Ok(raw) => {
                if let Err(e) = self.store.set(CACHE_STORAGE_KEY, &raw) {
                    warn!(error = %e, "translation cache persist failed");
                }
            }
            Err(e) => warn!(error = %e, "translation cache serialize failed"),
        }
    }

    /// Empty the cache and remove the persisted snapshot.
    pub fn clear(&self) {
        *self.inner.lock() = CacheSnapshot::default();
        self.remove_persisted();
    }

    /// Write the current snapshot back to storage (teardown).
    pub fn flush(&self) {
        let serialized = {
            let inner = self.inner.lock();
            if inner.entries.is_empty() {
                return;
            }
            serde_json::to_string(&*inner)
        };
        match serialized.map(|raw| self.store.set(CACHE_STORAGE_KEY, &raw)) {
            Ok(Ok(())) => debug!("translation cache flushed"),
            Ok(Err(e)) => warn!(error = %e, "translation cache flush failed"),
            Err(e) => warn!(error = %e, "translation cache serialize failed"),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, timestamp: i64) -> bool {
        let age_ms = (self.clock)().saturating_sub(timestamp);
        age_ms >= 0 && (age_ms as u128) < self.ttl.as_millis()
    }

    fn remove_persisted(&self) {
        if let Err(e) = self.store.remove(CACHE_STORAGE_KEY) {
            warn!(error = %e, "translation cache snapshot removal failed");
        }
    }
}
