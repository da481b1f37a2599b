//! TTL'd LRU result caches.
//!
//! Two caches keyed by query fingerprint: one for recall results, one for
//! enhanced prompts. Entries expire after a fixed TTL and the whole pair is
//! flushed on any successful write, so no cached result can contain a
//! deleted memory or omit a newly-inserted one.
//!
//! # Thread Safety
//!
//! `RwLock` interior mutability; reads take the write lock only to promote
//! LRU order and evict expired entries. Lock poisoning fails open: a cache
//! miss is always safe.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// A cache entry with its insertion instant.
#[derive(Debug, Clone)]
struct TimedEntry<T> {
    value: T,
    inserted_at: Instant,
}

/// An LRU cache whose entries expire after a TTL.
pub struct TtlCache<T> {
    entries: RwLock<LruCache<String, TimedEntry<T>>>,
    ttl: Duration,
}

impl<T> std::fmt::Debug for TtlCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl<T: Clone> TtlCache<T> {
    /// Creates a cache with the given capacity and TTL.
    ///
    /// A zero capacity is clamped to one entry.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Looks up a fingerprint, evicting the entry when expired.
    #[must_use]
    pub fn get(&self, fingerprint: &str) -> Option<T> {
        let mut entries = self.entries.write().ok()?;
        match entries.get(fingerprint) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                metrics::counter!("recall_cache_hits_total").increment(1);
                Some(entry.value.clone())
            },
            Some(_) => {
                entries.pop(fingerprint);
                metrics::counter!("recall_cache_expired_total").increment(1);
                None
            },
            None => None,
        }
    }

    /// Stores a value under a fingerprint.
    pub fn put(&self, fingerprint: String, value: T) {
        if let Ok(mut entries) = self.entries.write() {
            entries.put(
                fingerprint,
                TimedEntry {
                    value,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Drops every entry.
    pub fn flush(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Current entry count (expired entries included until touched).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    /// True when no entries are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The recall/enhance cache pair.
#[derive(Debug)]
pub struct RecallCaches {
    /// Fingerprint → recall result.
    pub recall: TtlCache<crate::models::RecallResult>,
    /// Fingerprint → enhanced prompt.
    pub enhance: TtlCache<super::enhance::EnhancedPrompt>,
}

impl RecallCaches {
    /// Creates both caches with shared capacity and TTL settings.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            recall: TtlCache::new(capacity, ttl),
            enhance: TtlCache::new(capacity, ttl),
        }
    }

    /// Flushes both caches.
    ///
    /// Called after every successful write, delete, or sweep: the simplest
    /// policy that keeps cached results coherent with the store.
    pub fn flush_all(&self) {
        self.recall.flush();
        self.enhance.flush();
        metrics::counter!("recall_cache_flushes_total").increment(1);
    }
}
