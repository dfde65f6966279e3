//! In-process tagged cache.
//!
//! Entries are keyed by string and carry the non-empty tag set declared by
//! the fetch that produced them. A reverse index (tag -> keys) makes tag
//! invalidation proportional to the number of affected entries.
//!
//! Reads are lock-free (`DashMap`). Writes that touch both maps take a
//! short `parking_lot` mutex so the entry map and the tag index never
//! disagree: an entry present in `entries` is always reachable from every
//! tag it declared.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use super::tags::{CacheTag, CacheTags};

/// Failure to encode a value for storage.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode cache payload for '{key}': {message}")]
pub struct CacheEncodeError {
    pub key: String,
    pub message: String,
}

/// A cached payload with its tags and lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Arc<Vec<u8>>,
    pub tags: Vec<String>,
    pub stored_at: Instant,
    /// `None` never expires.
    pub ttl: Option<Duration>,
}

impl CacheEntry {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(self.stored_at) >= ttl)
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently stored, expired ones included until cleaned up.
    pub entries: usize,
    /// Distinct tags with at least one indexed entry.
    pub tags: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because their TTL elapsed.
    pub evictions: u64,
}

/// Tagged key/value store with TTL.
#[derive(Default)]
pub struct TaggedCache {
    entries: DashMap<String, CacheEntry>,
    tag_index: DashMap<String, HashSet<String>>,
    write_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TaggedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw payload for `key` if present and not expired.
    pub fn get_raw(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.payload));
            }
            drop(entry);
            if self.remove_entry(key, true) {
                tracing::trace!(key = %key, "expired entry evicted on read");
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Stores `payload` under `key`, replacing any previous entry and its
    /// tag memberships.
    pub fn set_raw(&self, key: &str, payload: Vec<u8>, tags: &CacheTags, ttl: Option<Duration>) {
        let tag_keys = tags.to_keys();
        let _guard = self.write_lock.lock();

        let previous = self.entries.insert(
            key.to_string(),
            CacheEntry {
                payload: Arc::new(payload),
                tags: tag_keys.clone(),
                stored_at: Instant::now(),
                ttl,
            },
        );
        if let Some(previous) = previous {
            self.unindex(key, &previous.tags);
        }
        for tag in tag_keys {
            self.tag_index.entry(tag).or_default().insert(key.to_string());
        }
    }

    /// Decodes the value stored under `key`. Undecodable payloads are
    /// dropped and reported as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.get_raw(key)?;
        match rmp_serde::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "dropping undecodable cache entry");
                self.remove(key);
                None
            }
        }
    }

    /// Encodes `value` with MessagePack and stores it.
    pub fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        tags: &CacheTags,
        ttl: Option<Duration>,
    ) -> Result<(), CacheEncodeError> {
        let payload = rmp_serde::to_vec(value).map_err(|e| CacheEncodeError {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.set_raw(key, payload, tags, ttl);
        tracing::debug!(key = %key, ttl_secs = ?ttl.map(|t| t.as_secs()), "cache set");
        Ok(())
    }

    /// `true` if `key` holds a live entry. Does not touch the counters.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| !e.is_expired())
    }

    /// Removes one entry. Returns `true` if it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.remove_entry(key, false)
    }

    /// Removes every entry that declared `tag`. Returns the number removed.
    pub fn invalidate_tag(&self, tag: &CacheTag) -> usize {
        let tag_key = tag.to_string();
        let _guard = self.write_lock.lock();

        let Some((_, keys)) = self.tag_index.remove(&tag_key) else {
            return 0;
        };
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                self.unindex(&key, &entry.tags);
                removed += 1;
            }
        }
        tracing::debug!(tag = %tag_key, removed, "tag invalidated");
        removed
    }

    /// Removes everything.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.entries.clear();
        self.tag_index.clear();
    }

    /// Drops expired entries. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let _guard = self.write_lock.lock();

        let mut expired = Vec::new();
        self.entries.retain(|key, entry| {
            if entry.is_expired_at(now) {
                expired.push((key.clone(), std::mem::take(&mut entry.tags)));
                false
            } else {
                true
            }
        });
        for (key, tags) in &expired {
            self.unindex(key, tags);
        }

        let removed = expired.len();
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            tags: self.tag_index.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn remove_entry(&self, key: &str, only_if_expired: bool) -> bool {
        let _guard = self.write_lock.lock();
        let removed = if only_if_expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired())
        } else {
            self.entries.remove(key)
        };
        match removed {
            Some((key, entry)) => {
                self.unindex(&key, &entry.tags);
                if only_if_expired {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }

    /// Caller must hold `write_lock`.
    fn unindex(&self, key: &str, tags: &[String]) {
        for tag in tags {
            if let Some(mut keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    drop(keys);
                    self.tag_index.remove_if(tag, |_, keys| keys.is_empty());
                }
            }
        }
    }
}
