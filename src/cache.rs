//! Operation cache (computed table) for BDD memoization.
//!
//! A thin wrapper around [HashMap] that counts hits and misses, so snapshot
//! builds can report how much work the cache saved.

use std::collections::HashMap;
use std::hash::Hash;

pub struct Cache<K, V> {
    map: HashMap<K, V>,
    hits: usize,
    misses: usize,
}

impl<K, V> Cache<K, V> {
    /// Creates a cache pre-sized for `2^bits` entries.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Bits should be in the range 0..=31");
        Self {
            map: HashMap::with_capacity(1 << bits),
            hits: 0,
            misses: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq,
{
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let found = self.map.get(key);
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.map.insert(key, value);
    }
}
