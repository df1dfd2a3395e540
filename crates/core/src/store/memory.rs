//! In-process tier.
//!
//! Values are held behind `Arc` so a reader always gets a whole, immutable
//! value; replacing a key swaps the pointer and never mutates in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

pub struct MemoryTier<V> {
    entries: RwLock<HashMap<String, Arc<V>>>,
    /// Set once every durable key is known to be mirrored here.
    complete: AtomicBool,
}

impl<V> Default for MemoryTier<V> {
    fn default() -> Self {
        Self { entries: RwLock::new(HashMap::new()), complete: AtomicBool::new(false) }
    }
}

impl<V> MemoryTier<V> {
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.entries.read().get(key).cloned()
    }

    /// Insert `value`, returning what was there before.
    pub fn insert(&self, key: &str, value: Arc<V>) -> Option<Arc<V>> {
        self.entries.write().insert(key.to_string(), value)
    }

    /// Insert `value` unless a value is already present; returns the winner.
    ///
    /// Read-through uses this so a value fetched from disk never overwrites a
    /// newer one committed while the disk read was in flight.
    pub fn insert_if_absent(&self, key: &str, value: Arc<V>) -> Arc<V> {
        self.entries
            .write()
            .entry(key.to_string())
            .or_insert(value)
            .clone()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn mark_complete(&self) {
        self.complete.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        self.complete.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_returns_prior() {
        let tier = MemoryTier::default();
        assert!(tier.insert("k", Arc::new(1)).is_none());
        assert_eq!(tier.insert("k", Arc::new(2)).as_deref(), Some(&1));
        assert_eq!(tier.get("k").as_deref(), Some(&2));
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let tier = MemoryTier::default();
        tier.insert("k", Arc::new("new"));
        let winner = tier.insert_if_absent("k", Arc::new("stale"));
        assert_eq!(*winner, "new");
        assert_eq!(tier.get("k").as_deref(), Some(&"new"));
    }

    #[test]
    fn test_keys_sorted_and_clear() {
        let tier = MemoryTier::default();
        tier.insert("users", Arc::new(()));
        tier.insert("cities", Arc::new(()));
        tier.mark_complete();
        assert_eq!(tier.keys(), vec!["cities".to_string(), "users".to_string()]);
        assert_eq!(tier.len(), 2);

        tier.clear();
        assert!(tier.is_empty());
        assert!(!tier.is_complete());
    }
}
