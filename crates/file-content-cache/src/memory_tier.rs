//! Bounded in-process LRU of file contents

use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct Inner {
    lru: LruCache<String, Arc<[u8]>>,
    bytes: usize,
}

impl Inner {
    fn empty() -> Self {
        Self {
            lru: LruCache::unbounded(),
            bytes: 0,
        }
    }
}

pub struct MemoryTier {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::empty()),
            capacity: capacity.max(1),
        }
    }

    /// Look up `key`, marking it most recently used
    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        self.inner.lock().lru.get(key).cloned()
    }

    /// Insert or replace `key`; returns the key evicted to make room, if any
    pub fn put(&self, key: &str, content: Arc<[u8]>) -> Option<String> {
        let mut inner = self.inner.lock();

        let mut evicted = None;
        if !inner.lru.contains(key) && inner.lru.len() >= self.capacity {
            if let Some((old_key, old)) = inner.lru.pop_lru() {
                inner.bytes -= old.len();
                debug!(key = %old_key, "Evicted least recently used entry");
                evicted = Some(old_key);
            }
        }

        inner.bytes += content.len();
        if let Some((_, replaced)) = inner.lru.push(key.to_string(), content) {
            inner.bytes -= replaced.len();
        }
        evicted
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.lru.pop(key) {
            Some(content) => {
                inner.bytes -= content.len();
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        *self.inner.lock() = Inner::empty();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total content bytes held
    pub fn bytes(&self) -> usize {
        self.inner.lock().bytes
    }

    /// Rebuild the map at its current size, releasing capacity left by removals
    pub fn shrink(&self) {
        let mut inner = self.inner.lock();
        let mut rebuilt = LruCache::unbounded();
        // Least recent first, so the rebuilt order matches
        while let Some((key, content)) = inner.lru.pop_lru() {
            rebuilt.push(key, content);
        }
        inner.lru = rebuilt;
    }

    /// Keys from most to least recently used
    #[cfg(test)]
    fn keys(&self) -> Vec<String> {
        self.inner.lock().lru.iter().map(|(k, _)| k.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &str) -> Arc<[u8]> {
        Arc::from(s.as_bytes())
    }

    #[test]
    fn test_put_and_get() {
        let tier = MemoryTier::new(4);
        assert!(tier.get("a").is_none());
        tier.put("a", bytes("alpha"));
        assert_eq!(&*tier.get("a").unwrap(), b"alpha");
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.bytes(), 5);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let tier = MemoryTier::new(3);
        tier.put("a", bytes("1"));
        tier.put("b", bytes("2"));
        tier.put("c", bytes("3"));

        let evicted = tier.put("d", bytes("4"));
        assert_eq!(evicted.as_deref(), Some("a"));
        assert_eq!(tier.len(), 3);
        assert_eq!(tier.keys(), vec!["d", "c", "b"]);
    }

    #[test]
    fn test_access_resets_recency() {
        let tier = MemoryTier::new(3);
        tier.put("a", bytes("1"));
        tier.put("b", bytes("2"));
        tier.put("c", bytes("3"));

        tier.get("a");
        let evicted = tier.put("d", bytes("4"));
        assert_eq!(evicted.as_deref(), Some("b"));
        assert_eq!(tier.keys(), vec!["d", "a", "c"]);
    }

    #[test]
    fn test_replace_existing_key() {
        let tier = MemoryTier::new(2);
        tier.put("a", bytes("old"));
        tier.put("b", bytes("x"));
        assert!(tier.put("a", bytes("newer")).is_none());
        assert_eq!(tier.len(), 2);
        assert_eq!(&*tier.get("a").unwrap(), b"newer");
        assert_eq!(tier.bytes(), 6);
        assert_eq!(tier.keys(), vec!["a", "b"]);
    }

    #[test]
    fn test_remove_frees_room() {
        let tier = MemoryTier::new(3);
        tier.put("a", bytes("1"));
        tier.put("b", bytes("2"));
        tier.put("c", bytes("3"));

        assert!(tier.remove("b"));
        assert!(!tier.remove("b"));
        assert_eq!(tier.keys(), vec!["c", "a"]);
        assert_eq!(tier.bytes(), 2);

        assert!(tier.put("d", bytes("4")).is_none());
        assert_eq!(tier.keys(), vec!["d", "c", "a"]);
    }

    #[test]
    fn test_eviction_releases_bytes() {
        let tier = MemoryTier::new(2);
        tier.put("a", bytes("aaaa"));
        tier.put("b", bytes("bb"));
        tier.put("c", bytes("c"));
        assert_eq!(tier.bytes(), 3);
        assert!(tier.get("a").is_none());
    }

    #[test]
    fn test_shrink_keeps_order_and_clear_empties() {
        let tier = MemoryTier::new(8);
        for i in 0..8 {
            tier.put(&format!("k{}", i), bytes("v"));
        }
        for i in 4..8 {
            tier.remove(&format!("k{}", i));
        }
        tier.shrink();
        assert_eq!(tier.len(), 4);
        assert_eq!(tier.keys(), vec!["k3", "k2", "k1", "k0"]);

        tier.clear();
        assert!(tier.is_empty());
        assert_eq!(tier.bytes(), 0);
        tier.put("z", bytes("1"));
        assert_eq!(tier.keys(), vec!["z"]);
    }

    #[test]
    fn test_capacity_one() {
        let tier = MemoryTier::new(1);
        tier.put("a", bytes("1"));
        assert_eq!(tier.put("b", bytes("2")).as_deref(), Some("a"));
        assert_eq!(tier.keys(), vec!["b"]);
    }
}
