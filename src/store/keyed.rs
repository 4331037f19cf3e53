//! The keyed store backing all scan state.

use parking_lot::Mutex;
use std::collections::BTreeMap;

/// A thread-safe key→value map.
///
/// `set` takes a cost hint for cache-like backends; the in-memory backend
/// ignores it. The return value reports whether the value was accepted.
pub trait KeyValueStore<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn set(&self, key: &str, value: V, cost: i64) -> bool;
    #[allow(dead_code)] // only pack deletion removes keys
    fn del(&self, key: &str);
}

/// Ordered in-memory map behind one lock. Last writer wins.
#[derive(Debug)]
pub struct MemoryStore<V> {
    entries: Mutex<BTreeMap<String, V>>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<V: Clone> MemoryStore<V> {
    /// Copies every entry; used to compare store states.
    pub fn snapshot(&self) -> BTreeMap<String, V> {
        self.entries.lock().clone()
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send> KeyValueStore<V> for MemoryStore<V> {
    fn get(&self, key: &str) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: V, _cost: i64) -> bool {
        self.entries.lock().insert(key.to_string(), value);
        true
    }

    fn del(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}
