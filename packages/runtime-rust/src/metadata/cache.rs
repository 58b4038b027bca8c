//! Bounded memo cache with single-flight computation and idle expiry.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use quick_cache::sync::Cache;

struct Entry<V> {
    value: V,
    /// Milliseconds since the cache epoch of the last hit.
    last_access: AtomicU64,
}

/// Memoizes computed values per key.
///
/// Concurrent misses on the same key compute once: the first caller runs the
/// computation while the others wait for its result. Failed computations
/// are not cached. Entries idle for longer than `expire_after` are dropped
/// on their next access and recomputed.
pub struct MemoCache<K, V> {
    entries: Cache<K, Arc<Entry<V>>>,
    expire_after: Duration,
    epoch: Instant,
    computations: AtomicUsize,
    /// Serializes evictions of expired entries.
    evicting: Mutex<()>,
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new(capacity: usize, expire_after: Duration) -> Self {
        Self {
            entries: Cache::new(capacity.max(1)),
            expire_after,
            epoch: Instant::now(),
            computations: AtomicUsize::new(0),
            evicting: Mutex::new(()),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn is_expired(&self, entry: &Entry<V>, now: u64) -> bool {
        let idle = now.saturating_sub(entry.last_access.load(Ordering::Relaxed));
        u128::from(idle) > self.expire_after.as_millis()
    }

    /// Returns the cached value for `key`, computing it with `compute` on a
    /// miss (or after idle expiry).
    ///
    /// # Errors
    ///
    /// Propagates the error of `compute`; nothing is cached in that case.
    pub fn get_or_try_insert<E>(
        &self,
        key: &K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        let now = self.now_ms();
        if let Some(entry) = self.entries.get(key) {
            if self.is_expired(&entry, now) {
                self.evict_stale(key, &entry);
            } else {
                entry.last_access.store(now, Ordering::Relaxed);
                return Ok(entry.value.clone());
            }
        }
        let entry = self.entries.get_or_insert_with(key, || {
            self.computations.fetch_add(1, Ordering::Relaxed);
            compute().map(|value| {
                Arc::new(Entry {
                    value,
                    last_access: AtomicU64::new(now),
                })
            })
        })?;
        Ok(entry.value.clone())
    }

    /// Removes the entry for `key` only if it is still `stale`; a fresh value
    /// inserted by a concurrent refill stays.
    fn evict_stale(&self, key: &K, stale: &Arc<Entry<V>>) {
        let _guard = self.evicting.lock();
        if let Some(current) = self.entries.get(key) {
            if Arc::ptr_eq(&current, stale) {
                self.entries.remove(key);
            }
        }
    }

    /// Cached value without computing or refreshing it.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries.peek(key).map(|entry| entry.value.clone())
    }

    /// Number of computations run so far (misses, including failed ones).
    #[must_use]
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<K, V> std::fmt::Debug for MemoCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoCache")
            .field("expire_after", &self.expire_after)
            .field("computations", &self.computations.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
