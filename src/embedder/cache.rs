//! Process-local LRU cache for query embeddings.
//!
//! Keys are normalized (lowercase + trim) so the same query text always
//! lands on the same entry regardless of casing or padding. Entries expire
//! after a TTL; expiry is observed lazily on read and counts as a miss.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

pub const DEFAULT_MAX_SIZE: usize = 1000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Counter snapshot returned by [`EmbeddingCache::stats`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
}

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Thread-safe query-keyed embedding cache with TTL and LRU eviction.
pub struct EmbeddingCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    max_size: usize,
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_SIZE, DEFAULT_TTL)
    }

    pub fn with_config(max_size: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
            ttl,
            max_size: capacity.get(),
        }
    }

    fn normalize(query: &str) -> String {
        query.trim().to_lowercase()
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.inserted_at.elapsed() >= self.ttl
    }

    /// Returns the cached vector for `query`, promoting it to
    /// most-recently-used. Expired entries are evicted and count as misses.
    pub fn get(&self, query: &str) -> Option<Vec<f32>> {
        let key = Self::normalize(query);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let expired = match inner.entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() >= self.ttl => true,
            Some(entry) => {
                let vector = entry.vector.clone();
                inner.hits += 1;
                return Some(vector);
            }
            None => {
                inner.misses += 1;
                return None;
            }
        };

        if expired {
            inner.entries.pop(&key);
        }
        inner.misses += 1;
        None
    }

    /// Stores a vector under the normalized query key, evicting from the
    /// least-recently-used end when over capacity.
    pub fn set(&self, query: &str, vector: Vec<f32>) {
        let key = Self::normalize(query);
        self.inner.lock().entries.put(
            key,
            CacheEntry {
                vector,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Whether a live entry exists, without touching recency or counters.
    pub fn has(&self, query: &str) -> bool {
        let key = Self::normalize(query);
        let guard = self.inner.lock();
        guard
            .entries
            .peek(&key)
            .is_some_and(|entry| !self.is_expired(entry))
    }

    /// Evicts all expired entries, returning how many were removed.
    pub fn prune(&self) -> usize {
        let mut guard = self.inner.lock();
        let expired: Vec<String> = guard
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            guard.entries.pop(key);
        }
        expired.len()
    }

    /// Drops all entries and resets both counters.
    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        guard.entries.clear();
        guard.hits = 0;
        guard.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let guard = self.inner.lock();
        CacheStats {
            hits: guard.hits,
            misses: guard.misses,
            size: guard.entries.len(),
            max_size: self.max_size,
        }
    }

    /// `hits / (hits + misses)`, or `0.0` before any lookups.
    pub fn hit_rate(&self) -> f64 {
        let stats = self.stats();
        let total = stats.hits + stats.misses;
        if total == 0 {
            0.0
        } else {
            stats.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_vectors() {
        let cache = EmbeddingCache::new();
        cache.set("rust traits", vec![1.0, 2.0]);
        assert_eq!(cache.get("rust traits"), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn keys_are_normalized_consistently() {
        let cache = EmbeddingCache::new();
        cache.set("  Rust Traits  ", vec![0.5]);
        assert!(cache.has("rust traits"));
        assert_eq!(cache.get("RUST TRAITS"), Some(vec![0.5]));
        // One entry, not three.
        assert_eq!(cache.stats().size, 1);
    }

    #[test]
    fn lru_eviction_keeps_recently_used_entries() {
        let cache = EmbeddingCache::with_config(3, Duration::from_secs(600));
        cache.set("q1", vec![1.0]);
        cache.set("q2", vec![2.0]);
        cache.set("q3", vec![3.0]);
        assert!(cache.get("q1").is_some());
        cache.set("q4", vec![4.0]);

        assert!(cache.get("q2").is_none(), "q2 was least recently used");
        assert!(cache.get("q1").is_some());
        assert!(cache.get("q3").is_some());
        assert!(cache.get("q4").is_some());
    }

    #[test]
    fn expired_entries_count_as_misses() {
        let cache = EmbeddingCache::with_config(10, Duration::ZERO);
        cache.set("query", vec![1.0]);
        assert_eq!(cache.get("query"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 0, "expired entry is evicted on read");
    }

    #[test]
    fn prune_removes_only_expired_entries() {
        let cache = EmbeddingCache::with_config(10, Duration::ZERO);
        cache.set("a", vec![1.0]);
        cache.set("b", vec![2.0]);
        assert_eq!(cache.prune(), 2);
        assert_eq!(cache.stats().size, 0);

        let fresh = EmbeddingCache::with_config(10, Duration::from_secs(600));
        fresh.set("a", vec![1.0]);
        assert_eq!(fresh.prune(), 0);
        assert_eq!(fresh.stats().size, 1);
    }

    #[test]
    fn hit_rate_tracks_lookups() {
        let cache = EmbeddingCache::new();
        assert_eq!(cache.hit_rate(), 0.0);

        cache.set("q", vec![1.0]);
        cache.get("q");
        cache.get("missing");
        assert!((cache.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn clear_resets_counters() {
        let cache = EmbeddingCache::new();
        cache.set("q", vec![1.0]);
        cache.get("q");
        cache.get("missing");
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.size, 0);
        assert_eq!(cache.hit_rate(), 0.0);
    }

    #[test]
    fn has_does_not_disturb_recency_or_counters() {
        let cache = EmbeddingCache::with_config(2, Duration::from_secs(600));
        cache.set("old", vec![1.0]);
        cache.set("new", vec![2.0]);
        assert!(cache.has("old"));
        // "old" stays least recently used despite the `has` probe.
        cache.set("third", vec![3.0]);
        assert!(!cache.has("old"));
        assert_eq!(cache.stats().misses, 0);
    }
}
