//! In-memory response cache with per-entry TTLs.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::CacheKey;

/// A cached response with its freshness metadata.
#[derive(Debug, Clone)]
struct CacheEntry {
    bytes: Bytes,
    stored_at: Instant,
    max_age: Option<Duration>,
}

impl CacheEntry {
    fn is_expired_at(&self, now: Instant, limit: Option<Duration>) -> bool {
        match limit {
            Some(max_age) => now.duration_since(self.stored_at) > max_age,
            None => false,
        }
    }
}

/// Process-local response cache keyed by [`CacheKey`].
///
/// Stores raw bytes only; typed deserialization is the caller's concern.
/// Access is serialized behind a mutex and reads return cheap copies, so a
/// writer can never be observed mid-write. Nothing is persisted across
/// process restarts.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl CacheStore {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the cached bytes for a key.
    ///
    /// Returns the entry only if it is fresh under `max_age` — the argument
    /// overrides the entry's own TTL when provided. An expired entry is
    /// removed on the spot.
    #[must_use]
    pub fn read(&self, key: &CacheKey, max_age: Option<Duration>) -> Option<Bytes> {
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?;

        let limit = max_age.or(entry.max_age);
        if entry.is_expired_at(Instant::now(), limit) {
            entries.remove(key);
            return None;
        }

        Some(entry.bytes.clone())
    }

    /// Stores bytes under a key, replacing any prior entry.
    pub fn write(&self, key: CacheKey, bytes: Bytes, max_age: Option<Duration>) {
        self.entries.lock().insert(
            key,
            CacheEntry {
                bytes,
                stored_at: Instant::now(),
                max_age,
            },
        );
    }

    /// Removes the entry for a key, if present.
    pub fn invalidate(&self, key: &CacheKey) {
        self.entries.lock().remove(key);
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Removes every entry that has outlived its own TTL.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries
            .lock()
            .retain(|_, entry| !entry.is_expired_at(now, entry.max_age));
    }

    /// The number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
