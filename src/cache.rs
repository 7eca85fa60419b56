//! Process-wide lookup cache cleared wholesale on reload.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::watcher::WatchResult;

/// A cache the reloader can invalidate.
///
/// Invalidation is all-or-nothing; there is no key-level eviction.
pub trait LookupCache: Send + Sync {
    fn clear_all(&self) -> WatchResult<()>;
}

/// Concurrent keyed store for resolved lookups (template details, paths, ...).
pub struct DetailsCache<K, V> {
    entries: DashMap<K, Arc<V>>,
    clears: AtomicU64,
}

impl<K, V> DetailsCache<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            clears: AtomicU64::new(0),
        }
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    pub fn fetch_or_insert_with(&self, key: K, compute: impl FnOnce() -> V) -> Arc<V> {
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(compute()));
        Arc::clone(entry.value())
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many times the cache was cleared wholesale.
    pub fn clear_count(&self) -> u64 {
        self.clears.load(Ordering::Acquire)
    }
}

impl<K, V> Default for DetailsCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> LookupCache for DetailsCache<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
{
    fn clear_all(&self) -> WatchResult<()> {
        let dropped = self.entries.len();
        self.entries.clear();
        let clears = self.clears.fetch_add(1, Ordering::AcqRel) + 1;
        crate::debug_event!("cache", "cleared", "{dropped} entries (clear #{clears})");
        Ok(())
    }
}

impl<K, V> std::fmt::Debug for DetailsCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetailsCache")
            .field("clears", &self.clears.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_fetch_or_insert_computes_once() {
        let cache: DetailsCache<String, PathBuf> = DetailsCache::new();
        let mut computed = 0;

        let first = cache.fetch_or_insert_with("users/index".to_string(), || {
            computed += 1;
            PathBuf::from("/app/views/users/index.html.erb")
        });
        let second = cache.fetch_or_insert_with("users/index".to_string(), || {
            computed += 1;
            PathBuf::from("/elsewhere")
        });

        assert_eq!(computed, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_all_empties_and_counts() {
        let cache: DetailsCache<&'static str, u32> = DetailsCache::new();
        cache.fetch_or_insert_with("a", || 1);
        cache.fetch_or_insert_with("b", || 2);
        assert_eq!(cache.clear_count(), 0);

        cache.clear_all().unwrap();

        assert!(cache.is_empty());
        assert!(cache.get(&"a").is_none());
        assert_eq!(cache.clear_count(), 1);

        cache.clear_all().unwrap();
        assert_eq!(cache.clear_count(), 2);
    }
}
