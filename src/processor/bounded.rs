//! Fixed-capacity insertion-ordered map with batch eviction
//!
//! When an insertion would exceed the capacity, the `evict_batch` oldest keys
//! are dropped in one pass. Fewer, larger eviction passes in exchange for
//! briefly holding up to `capacity` entries.

use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
pub struct BatchEvictingMap<V> {
    entries: HashMap<String, V>,
    /// Keys in first-insertion order, oldest at the front
    order: VecDeque<String>,
    capacity: usize,
    evict_batch: usize,
    evicted: u64,
}

impl<V> BatchEvictingMap<V> {
    /// Both arguments are clamped to at least 1, and `evict_batch` to `capacity`
    pub fn new(capacity: usize, evict_batch: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
            evict_batch: evict_batch.clamp(1, capacity),
            evicted: 0,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert or update. Updating keeps the key's original position.
    pub fn insert(&mut self, key: String, value: V) -> Option<V> {
        if let Some(slot) = self.entries.get_mut(&key) {
            return Some(std::mem::replace(slot, value));
        }

        if self.entries.len() + 1 > self.capacity {
            self.evict_oldest(self.evict_batch);
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        None
    }

    /// Drop up to `n` of the oldest keys, returning how many were removed
    pub fn evict_oldest(&mut self, n: usize) -> usize {
        let mut removed = 0;
        while removed < n {
            match self.order.pop_front() {
                Some(key) => {
                    self.entries.remove(&key);
                    removed += 1;
                }
                None => break,
            }
        }
        self.evicted += removed as u64;
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total keys evicted since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
