use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::debug;

/// Cache entry con TTL y marca de último acceso
#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    last_used: AtomicU64,
    ttl: Option<Duration>,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Option<Duration>, tick: u64) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            last_used: AtomicU64::new(tick),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.ttl
            .map(|ttl| self.created_at.elapsed() > ttl)
            .unwrap_or(false)
    }
}

/// Bounded LRU cache shared between tasks.
///
/// Eviction scans for the least recently used entry, which is fine for the
/// few hundred entries this is sized for.
#[derive(Debug)]
pub struct LRUCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    clock: Arc<AtomicU64>,
    capacity: usize,
}

impl<K, V> LRUCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            clock: Arc::new(AtomicU64::new(0)),
            capacity: capacity.max(1),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.insert_with_ttl(key, value, None)
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) -> Option<V> {
        if !self.data.contains_key(&key) && self.data.len() >= self.capacity {
            self.evict_least_recent();
        }

        let entry = CacheEntry::new(value, ttl, self.tick());
        self.data.insert(key, entry).map(|old| old.value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.data.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.data.remove(key);
            return None;
        }

        entry.last_used.store(self.tick(), Ordering::Relaxed);
        Some(entry.value.clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_least_recent(&self) {
        let oldest = self
            .data
            .iter()
            .min_by_key(|entry| entry.value().last_used.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.data.remove(&key);
        }
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&self) -> usize {
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            debug!("Limpiadas {} entradas expiradas del cache", removed);
        }

        removed
    }
}

impl<K, V> Clone for LRUCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            clock: self.clock.clone(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_the_least_recently_used_entry() {
        let cache = LRUCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);

        // "a" pasa a ser el más reciente
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let cache = LRUCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);

        assert_eq!(cache.insert("a", 10), Some(1));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = LRUCache::new(4);
        cache.insert_with_ttl("gone", 1, Some(Duration::ZERO));
        cache.insert("kept", 2);

        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.get(&"gone"), None);
        assert_eq!(cache.get(&"kept"), Some(2));
    }
}
