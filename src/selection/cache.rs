//! Time-boxed LRU cache of selection results.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Default number of cached queries.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 100;

/// Default lifetime of a cached entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Hit and miss counters of a [`QueryCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
    /// Entries currently held.
    pub size: usize,
    /// Capacity.
    pub max_size: usize,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

#[derive(Debug)]
struct CacheState<V> {
    entries: LruCache<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

/// Bounded map from query key to a cached value with per-entry TTL.
///
/// Once full, inserting a new key evicts the least recently used entry. A
/// read past the TTL counts as a miss and drops the stale entry.
///
/// When attached to a [`ToolSelector`](super::ToolSelector) the key covers
/// the whole [`SelectionContext`](super::SelectionContext) (prompt, current
/// file, user intent, include and exclude domains) plus the effective
/// options, so the same prompt under different options is cached apart.
#[derive(Debug)]
pub struct QueryCache<V> {
    state: Mutex<CacheState<V>>,
    ttl: Duration,
}

impl<V: Clone> QueryCache<V> {
    /// Creates a cache holding at most `max_size` entries for `ttl` each.
    ///
    /// A zero `max_size` is raised to one.
    #[must_use]
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
            ttl,
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the value cached for `key`, refreshing its recency.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.state();
        let ttl = self.ttl;
        let lookup = state
            .entries
            .get(key)
            .map(|entry| (entry.inserted_at.elapsed() < ttl, entry.value.clone()));

        match lookup {
            Some((true, value)) => {
                state.hits += 1;
                Some(value)
            }
            Some((false, _)) => {
                state.entries.pop(key);
                state.misses += 1;
                None
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Caches `value` under `key`, evicting the oldest entry when full.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.state().entries.put(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&self) {
        self.state().entries.clear();
    }

    /// Returns the number of entries, including expired ones not yet read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// Returns whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns hit and miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            size: state.entries.len(),
            max_size: state.entries.cap().get(),
        }
    }
}

impl<V: Clone> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_MAX_SIZE, DEFAULT_CACHE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let cache = QueryCache::new(2, DEFAULT_CACHE_TTL);
        cache.insert("first", 1);
        cache.insert("second", 2);
        cache.insert("third", 3);

        assert_eq!(cache.get("first"), None);
        assert_eq!(cache.get("second"), Some(2));
        assert_eq!(cache.get("third"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn read_hit_protects_entry_from_eviction() {
        let cache = QueryCache::new(2, DEFAULT_CACHE_TTL);
        cache.insert("first", 1);
        cache.insert("second", 2);

        assert_eq!(cache.get("first"), Some(1));
        cache.insert("third", 3);

        assert_eq!(cache.get("second"), None);
        assert_eq!(cache.get("first"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_a_miss_and_dropped() {
        let cache = QueryCache::new(10, Duration::from_secs(60));
        cache.insert("query", "result");

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(cache.get("query"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = QueryCache::new(4, DEFAULT_CACHE_TTL);
        cache.insert("known", 1);

        assert_eq!(cache.get("known"), Some(1));
        assert_eq!(cache.get("unknown"), None);

        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                size: 1,
                max_size: 4,
            }
        );
    }
}
