use std::{
    borrow::Borrow,
    collections::HashMap,
    hash::Hash,
    time::{Duration, Instant},
};

/// Generic expiring key-value store.
///
/// One instance per logical dataset (posts, resolved media URLs, channel
/// info), each with its own default TTL and max entry count. Entries expire
/// lazily on `get`; when the cache is at capacity, `set` sweeps all expired
/// entries first. The size bound is advisory: if nothing has expired the
/// insert still proceeds, so `len()` can exceed `max_entries` transiently.
///
/// Single-owner access; callers that share an instance wrap it in a mutex.
/// Caches are disposable accelerators, never the source of truth.
#[derive(Debug)]
pub struct Cache<K, V> {
    default_ttl: Duration,
    max_entries: usize,
    entries: HashMap<K, CacheEntry<V>>,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    #[allow(dead_code)]
    inserted_at: Instant,
    expires_at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
}

impl<K: Eq + Hash, V: Clone> Cache<K, V> {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            default_ttl,
            max_entries,
            entries: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: K, value: V) {
        self.set_at(key, value, None, Instant::now());
    }

    pub fn set_with_ttl(&mut self, key: K, value: V, ttl: Duration) {
        self.set_at(key, value, Some(ttl), Instant::now());
    }

    pub fn set_at(&mut self, key: K, value: V, ttl: Option<Duration>, now: Instant) {
        if self.entries.len() >= self.max_entries {
            self.sweep_expired_at(now);
        }
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.get_at(key, Instant::now())
    }

    pub fn get_at<Q>(&mut self, key: &Q, now: Instant) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let expired = match self.entries.get(key) {
            Some(entry) => now > entry.expires_at,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn has<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.get(key).is_some()
    }

    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats_at(Instant::now())
    }

    pub fn stats_at(&self, now: Instant) -> CacheStats {
        let total = self.entries.len();
        let expired = self
            .entries
            .values()
            .filter(|e| now > e.expires_at)
            .count();
        CacheStats {
            total,
            valid: total - expired,
            expired,
        }
    }

    /// Remove every expired entry. Exactly the expired subset, nothing else.
    pub fn sweep_expired_at(&mut self, now: Instant) {
        self.entries.retain(|_, e| now <= e.expires_at);
    }
}
