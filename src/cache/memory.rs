//! In-memory LRU cache

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;

use super::Cache;
use crate::error::CacheError;

/// Bounded LRU cache
///
/// `get` promotes the entry, so it needs the lock exclusively. TTLs are
/// ignored; entries leave by eviction, `remove` or `clear`.
pub struct InMemoryCache<V> {
    entries: Mutex<LruCache<String, V>>,
}

impl<V> InMemoryCache<V> {
    /// Create a cache holding at most `size` entries
    pub fn new(size: usize) -> Result<Self, CacheError> {
        let capacity = NonZeroUsize::new(size).ok_or(CacheError::InvalidSize(size))?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

impl<V: Clone + Send> Cache<V> for InMemoryCache<V> {
    fn get(&self, key: &str) -> Result<Option<V>, CacheError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: V, _ttl: Option<Duration>) -> Result<(), CacheError> {
        self.entries.lock().put(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().pop(key);
        Ok(())
    }

    fn clear(&self, new_size: usize) -> Result<(), CacheError> {
        let capacity = NonZeroUsize::new(new_size).ok_or(CacheError::InvalidSize(new_size))?;
        let mut entries = self.entries.lock();
        entries.clear();
        entries.resize(capacity);
        Ok(())
    }

    fn len(&self) -> Option<usize> {
        Some(self.entries.lock().len())
    }
}
