use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use lru::LruCache;
use parking_lot::Mutex;
use crate::search::results::QueryResults;

/// Bounded LRU of finished result sets, keyed by the logical plan's
/// deterministic serialization. Bypassed for queries with feedback data
/// (their scores move independently of the indexes) and cleared on every
/// write that changes the underlying indexes.
pub struct PlanCache {
    cache: Mutex<LruCache<String, QueryResults>>,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        PlanCache {
            cache: Mutex::new(LruCache::new(cap)),
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<QueryResults> {
        let mut cache = self.cache.lock();
        match cache.get(key) {
            Some(results) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(results.clone())
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: String, results: QueryResults) {
        self.cache.lock().put(key, results);
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hit_count.load(Ordering::Relaxed);
        let misses = self.miss_count.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_evicts_and_clear_empties() {
        let cache = PlanCache::new(2);
        cache.put("a".into(), QueryResults::default());
        cache.put("b".into(), QueryResults::default());
        cache.put("c".into(), QueryResults::default());
        assert!(cache.get("a").is_none(), "oldest entry should be evicted");
        assert!(cache.get("b").is_some());

        cache.clear();
        assert!(cache.get("b").is_none());
    }
}
