use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;

struct Inner<K: Hash + Eq, V> {
    generation: u64,
    entries: LruCache<K, V>,
}

/// LRU of query results tagged with the index generation they were computed at.
/// Any lookup under a newer generation empties the cache first.
pub struct QueryCache<K: Hash + Eq, V> {
    inner: Option<Mutex<Inner<K, V>>>,
}

impl<K: Hash + Eq, V: Clone> QueryCache<K, V> {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        let inner = NonZeroUsize::new(capacity).map(|cap| Mutex::new(Inner { generation: 0, entries: LruCache::new(cap) }));
        Self { inner }
    }

    pub fn get(&self, key: &K, generation: u64) -> Option<V> {
        let mut inner = self.inner.as_ref()?.lock();
        if inner.generation != generation {
            inner.entries.clear();
            inner.generation = generation;
            return None;
        }
        inner.entries.get(key).cloned()
    }

    pub fn put(&self, key: K, value: V, generation: u64) {
        let Some(inner) = self.inner.as_ref() else { return };
        let mut inner = inner.lock();
        if inner.generation != generation {
            inner.entries.clear();
            inner.generation = generation;
        }
        inner.entries.put(key, value);
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.lock().entries.len())
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
