//! Cache Store Module
//!
//! The response cache: HashMap storage with TTL expiry, LRU eviction, and
//! an optional durable mirror behind the persistence port.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStats, LruTracker, PersistencePort};

// == Cache Store ==
/// Bounded key-value cache with TTL expiry and LRU eviction.
///
/// Capacity violations are always resolved by evicting the least recently
/// used entry, never by rejecting the write. When a persistence port is
/// configured, entries are mirrored under `prefix + key` and rehydrated on
/// construction; the mirror is best-effort and unparsable records are
/// silently dropped.
pub struct CacheStore<T> {
    entries: HashMap<String, CacheEntry<T>>,
    lru: LruTracker,
    stats: CacheStats,
    max_size: usize,
    default_ttl_ms: u64,
    persistence: Option<Arc<dyn PersistencePort>>,
    prefix: String,
}

impl<T> std::fmt::Debug for CacheStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("max_size", &self.max_size)
            .field("prefix", &self.prefix)
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

impl<T> CacheStore<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    // == Constructors ==
    /// Creates a store with no durable mirror.
    pub fn new(max_size: usize, default_ttl_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_size,
            default_ttl_ms,
            persistence: None,
            prefix: String::new(),
        }
    }

    /// Creates a store mirrored to a durable medium under `prefix`, and
    /// rehydrates every unexpired record found there. Expired or unparsable
    /// records are removed from the medium and skipped.
    pub fn with_persistence(
        max_size: usize,
        default_ttl_ms: u64,
        persistence: Arc<dyn PersistencePort>,
        prefix: impl Into<String>,
    ) -> Self {
        let prefix = prefix.into();
        let mut store = Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_size,
            default_ttl_ms,
            persistence: Some(persistence),
            prefix,
        };
        store.rehydrate();
        store
    }

    fn rehydrate(&mut self) {
        let Some(port) = self.persistence.clone() else {
            return;
        };

        let mut restored = 0usize;
        for stored_key in port.keys_with_prefix(&self.prefix) {
            let key = stored_key[self.prefix.len()..].to_string();
            let Some(raw) = port.load(&stored_key) else {
                continue;
            };
            match serde_json::from_str::<CacheEntry<T>>(&raw) {
                Ok(entry) if !entry.is_expired() && self.entries.len() < self.max_size => {
                    self.lru.touch(&key);
                    self.entries.insert(key, entry);
                    restored += 1;
                }
                Ok(_) => {
                    // expired while persisted, or no room left
                    port.remove(&stored_key);
                }
                Err(err) => {
                    warn!(key = %stored_key, %err, "dropping unparsable persisted cache record");
                    port.remove(&stored_key);
                }
            }
        }
        if restored > 0 {
            debug!(restored, prefix = %self.prefix, "rehydrated cache entries");
        }
        self.stats.set_total_entries(self.entries.len());
    }

    // == Set ==
    /// Inserts or overwrites a value with the given TTL (default TTL when
    /// `None`). At capacity, the least recently used entry is evicted first.
    pub fn set(&mut self, key: impl Into<String>, value: T, ttl_ms: Option<u64>) {
        let key = key.into();
        let is_overwrite = self.entries.contains_key(&key);

        if !is_overwrite && self.entries.len() >= self.max_size {
            if let Some(evicted) = self.lru.pop_oldest() {
                self.entries.remove(&evicted);
                self.remove_mirror(&evicted);
                self.stats.record_eviction();
                debug!(key = %evicted, "evicted least recently used entry");
            }
        }

        let entry = CacheEntry::new(value, ttl_ms.unwrap_or(self.default_ttl_ms));
        self.save_mirror(&key, &entry);
        self.entries.insert(key.clone(), entry);
        self.lru.touch(&key);
        self.stats.set_total_entries(self.entries.len());
    }

    // == Get ==
    /// Returns the value for `key` if present and unexpired, bumping its
    /// access metadata. Expired entries are purged on the spot (lazy expiry)
    /// and read as absent.
    pub fn get(&mut self, key: &str) -> Option<T> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        if expired {
            self.entries.remove(key);
            self.lru.remove(key);
            self.remove_mirror(key);
            self.stats.record_expiration();
            self.stats.record_miss();
            self.stats.set_total_entries(self.entries.len());
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.touch();
        let value = entry.value.clone();
        self.lru.touch(key);
        self.stats.record_hit();
        Some(value)
    }

    // == Delete ==
    /// Removes an entry; idempotent. Returns true when something was removed.
    pub fn delete(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.lru.remove(key);
            self.remove_mirror(key);
            self.stats.set_total_entries(self.entries.len());
        }
        removed
    }

    // == Clear ==
    /// Removes every entry and purges this store's slice of the durable
    /// mirror (other prefixes are untouched). Idempotent.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru = LruTracker::new();
        if let Some(port) = &self.persistence {
            for stored_key in port.keys_with_prefix(&self.prefix) {
                port.remove(&stored_key);
            }
        }
        self.stats.set_total_entries(0);
    }

    // == Invalidate Pattern ==
    /// Deletes every key matching `pattern`; returns how many were removed.
    /// Used by the push channel to drop stale reads on server notifications.
    pub fn invalidate_pattern(&mut self, pattern: &Regex) -> usize {
        let matching: Vec<String> = self
            .entries
            .keys()
            .filter(|k| pattern.is_match(k))
            .cloned()
            .collect();

        for key in &matching {
            self.entries.remove(key);
            self.lru.remove(key);
            self.remove_mirror(key);
        }
        if !matching.is_empty() {
            debug!(count = matching.len(), pattern = %pattern, "invalidated cache entries");
        }
        self.stats.set_total_entries(self.entries.len());
        matching.len()
    }

    // == Cleanup Expired ==
    /// Removes every expired entry; returns the count. Called by the
    /// background sweep so entries nobody touches still get purged.
    pub fn cleanup_expired(&mut self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.remove(key);
            self.lru.remove(key);
            self.remove_mirror(key);
            self.stats.record_expiration();
        }
        self.stats.set_total_entries(self.entries.len());
        expired.len()
    }

    // == Accessors ==
    /// Current number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a copy of the performance counters.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    // == Mirror Helpers ==
    fn save_mirror(&self, key: &str, entry: &CacheEntry<T>) {
        if let Some(port) = &self.persistence {
            match serde_json::to_string(entry) {
                Ok(record) => port.save(&format!("{}{}", self.prefix, key), &record),
                Err(err) => warn!(%key, %err, "failed to serialize entry for mirror"),
            }
        }
    }

    fn remove_mirror(&self, key: &str) {
        if let Some(port) = &self.persistence {
            port.remove(&format!("{}{}", self.prefix, key));
        }
    }
}
