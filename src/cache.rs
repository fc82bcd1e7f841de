//! Time-bounded response cache shared by every resource-fetching caller.
//!
//! - Entries expire after a per-entry TTL (default 5 minutes)
//! - Expired entries read as absent and are removed on access
//! - No size bound: entries leave only by expiry or explicit invalidation
//!
//! Keys are caller-built strings encoding resource identity and variant,
//! see [`key`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Default time-to-live for cached responses.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Build a cache key from resource kind, identifier and variant,
/// e.g. `key("file", "42", Some("thumb"))` gives `file:42:thumb`.
pub fn key(resource: &str, id: &str, variant: Option<&str>) -> String {
    match variant {
        Some(v) => format!("{}:{}:{}", resource, id, v),
        None => format!("{}:{}", resource, id),
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// In-memory key/value cache with per-entry expiry.
pub struct ResponseCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new() -> Self {
        Self::with_default_ttl(DEFAULT_TTL)
    }

    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a cached value if it exists and has not expired.
    ///
    /// An expired entry is removed as a side effect.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                log::debug!("Cache entry expired: {}", key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Store a value with the default TTL, overwriting any existing entry.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store a value with an explicit TTL, overwriting any existing entry.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries()
            .insert(key.into(), CacheEntry { value, expires_at });
    }

    /// Remove a specific entry (used after a mutation of the underlying resource).
    pub fn remove(&self, key: &str) {
        self.entries().remove(key);
    }

    /// Remove every entry, or only those whose key contains `pattern`.
    ///
    /// Returns the number of entries removed.
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        match pattern {
            None => entries.clear(),
            Some(p) => entries.retain(|k, _| !k.contains(p)),
        }
        let removed = before - entries.len();
        log::debug!("Cache cleared ({:?}): {} entries removed", pattern, removed);
        removed
    }

    /// Drop all expired entries without waiting for them to be read.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
