//! Per-slave retry anti-affinity cache. Keeps a slave from re-dequeuing a
//! retry it just submitted itself, without permanently starving the task if
//! every other slave is busy.

use indexmap::IndexMap;

const DEFAULT_MAX_SIZE: usize = 100;
const DEFAULT_MAX_COUNT: u32 = 10;

/// Tracks how many times each retried task has been seen by this slave
/// since it last put the retry back on the queue.
pub struct RetryCache {
    cache: IndexMap<String, u32>,
    max_size: usize,
    max_count: u32,
}

impl Default for RetryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_MAX_COUNT)
    }
}

impl RetryCache {
    pub fn new(max_size: usize, max_count: u32) -> Self {
        Self {
            cache: IndexMap::new(),
            max_size,
            max_count,
        }
    }

    /// Look up `item`. Returns `None` if it isn't tracked (never put here,
    /// or previously evicted). Each hit increments the touch count first;
    /// once that increment would exceed `max_count`, the entry is evicted
    /// and this call reports it absent instead of returning it — so an
    /// item put here is returned present for exactly `max_count` calls,
    /// then absent on the next one.
    pub fn get(&mut self, item: &str) -> Option<&str> {
        let count = self.cache.get(item).copied()?;
        if count + 1 > self.max_count {
            self.cache.shift_remove(item);
            return None;
        }
        if let Some(slot) = self.cache.get_mut(item) {
            *slot += 1;
        }
        self.cache.get_key_value(item).map(|(k, _)| k.as_str())
    }

    /// Record that `item` was just retried by this slave. If the cache is
    /// already at capacity, the oldest-inserted entry is evicted first.
    pub fn put(&mut self, item: impl Into<String>) {
        if self.cache.len() >= self.max_size && !self.cache.contains_key(&item.clone().into()) {
            self.cache.shift_remove_index(0);
        }
        self.cache.insert(item.into(), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_on_untracked_item_is_none() {
        let mut cache = RetryCache::default();
        assert_eq!(cache.get("x"), None);
    }

    #[test]
    fn get_is_present_for_max_count_calls_then_evicts() {
        let mut cache = RetryCache::new(100, 2);
        cache.put("x");
        assert_eq!(cache.get("x"), Some("x"));
        assert_eq!(cache.get("x"), Some("x"));
        // third get: incrementing would take the count past max_count(2),
        // so this call evicts the entry and reports it absent
        assert_eq!(cache.get("x"), None);
        assert_eq!(cache.get("x"), None);
    }

    #[test]
    fn put_evicts_oldest_at_capacity() {
        let mut cache = RetryCache::new(2, 10);
        cache.put("a");
        cache.put("b");
        cache.put("c");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some("b"));
        assert_eq!(cache.get("c"), Some("c"));
    }

    #[test]
    fn put_on_existing_key_does_not_evict() {
        let mut cache = RetryCache::new(2, 10);
        cache.put("a");
        cache.put("b");
        cache.put("a");
        assert_eq!(cache.get("a"), Some("a"));
        assert_eq!(cache.get("b"), Some("b"));
    }
}
