//! LRU Tracker Module
//!
//! Tracks key access order for eviction decisions.

use std::collections::VecDeque;

// == LRU Tracker ==
/// Access-order bookkeeping for the cache store.
///
/// Keys live in a VecDeque ordered front-to-back from least to most
/// recently used; eviction pops from the front.
#[derive(Debug, Default)]
pub struct LruTracker {
    order: VecDeque<String>,
}

impl LruTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used.
    pub fn touch(&mut self, key: &str) {
        self.remove(key);
        self.order.push_back(key.to_string());
    }

    // == Remove ==
    /// Drops a key from the tracker; no-op if absent.
    pub fn remove(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
    }

    // == Pop Oldest ==
    /// Removes and returns the least recently used key.
    pub fn pop_oldest(&mut self) -> Option<String> {
        self.order.pop_front()
    }

    /// Returns the least recently used key without removing it.
    pub fn oldest(&self) -> Option<&String> {
        self.order.front()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_orders_by_recency() {
        let mut lru = LruTracker::new();

        lru.touch("a");
        lru.touch("b");
        lru.touch("c");

        assert_eq!(lru.len(), 3);
        assert_eq!(lru.oldest(), Some(&"a".to_string()));
    }

    #[test]
    fn test_touch_existing_moves_to_back() {
        let mut lru = LruTracker::new();

        lru.touch("a");
        lru.touch("b");
        lru.touch("a");

        assert_eq!(lru.len(), 2);
        assert_eq!(lru.oldest(), Some(&"b".to_string()));
    }

    #[test]
    fn test_pop_oldest_sequence() {
        let mut lru = LruTracker::new();

        lru.touch("a");
        lru.touch("b");
        lru.touch("c");
        lru.touch("a"); // order is now b, c, a

        assert_eq!(lru.pop_oldest(), Some("b".to_string()));
        assert_eq!(lru.pop_oldest(), Some("c".to_string()));
        assert_eq!(lru.pop_oldest(), Some("a".to_string()));
        assert_eq!(lru.pop_oldest(), None);
    }

    #[test]
    fn test_remove_unknown_key_is_noop() {
        let mut lru = LruTracker::new();

        lru.touch("a");
        lru.remove("missing");

        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn test_repeated_touch_keeps_single_slot() {
        let mut lru = LruTracker::new();

        lru.touch("a");
        lru.touch("a");
        lru.touch("a");

        assert_eq!(lru.len(), 1);
        assert_eq!(lru.pop_oldest(), Some("a".to_string()));
        assert!(lru.is_empty());
    }
}
