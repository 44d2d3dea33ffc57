use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

/// Bounded memo with per-entry expiry. Expired entries are dropped on read;
/// capacity overflow evicts the least recently used entry.
pub struct TtlLru<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, (Instant, V)>>,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> TtlLru<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some((stored_at, value)) => {
                if now.saturating_duration_since(*stored_at) < self.ttl {
                    return Some(value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&self, key: K, value: V, now: Instant) {
        self.entries.lock().put(key, (now, value));
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().pop(key).map(|(_, value)| value)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl<K: Hash + Eq + Clone, V: Clone> TtlLru<K, V> {
    /// Removes every entry whose key fails `keep`; returns how many went.
    pub fn retain_keys(&self, mut keep: impl FnMut(&K) -> bool) -> usize {
        let mut entries = self.entries.lock();
        let doomed: Vec<K> = entries
            .iter()
            .map(|(key, _)| key)
            .filter(|key| !keep(*key))
            .cloned()
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }
}
