//! Insertion-ordered map with O(log n) removal.
//!
//! Backs the level buckets of the propagation queue and the per-processor
//! sorter queues, both of which need FIFO iteration plus removal of
//! arbitrary keys.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Map that iterates in first-insertion order.
#[derive(Debug, Clone)]
pub struct LinkedMap<K, V> {
    order: BTreeMap<u64, K>,
    entries: HashMap<K, (u64, V)>,
    next_seq: u64,
}

impl<K, V> Default for LinkedMap<K, V> {
    fn default() -> Self {
        Self {
            order: BTreeMap::new(),
            entries: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K: Copy + Eq + Hash, V> LinkedMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key).map(|(_, v)| v)
    }

    /// Returns the value for `key`, inserting `default()` at the back if absent.
    pub fn get_or_insert_with(&mut self, key: K, default: impl FnOnce() -> V) -> &mut V {
        let next_seq = &mut self.next_seq;
        let order = &mut self.order;
        let (_, value) = self.entries.entry(key).or_insert_with(|| {
            let seq = *next_seq;
            *next_seq += 1;
            order.insert(seq, key);
            (seq, default())
        });
        value
    }

    /// Inserts at the back. An existing key keeps its position and value.
    pub fn insert_if_absent(&mut self, key: K, value: V) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.get_or_insert_with(key, || value);
        true
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (seq, value) = self.entries.remove(key)?;
        self.order.remove(&seq);
        Some(value)
    }

    pub fn pop_front(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let (_, value) = self.entries.remove(&key)?;
        Some((key, value))
    }

    pub fn front_key(&self) -> Option<K> {
        self.order.first_key_value().map(|(_, k)| *k)
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .values()
            .filter_map(|k| self.entries.get(k).map(|(_, v)| (k, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_front_is_fifo() {
        let mut map = LinkedMap::new();
        map.insert_if_absent(3u32, 'a');
        map.insert_if_absent(1, 'b');
        map.insert_if_absent(2, 'c');

        assert_eq!(map.pop_front(), Some((3, 'a')));
        assert_eq!(map.pop_front(), Some((1, 'b')));
        assert_eq!(map.pop_front(), Some((2, 'c')));
        assert_eq!(map.pop_front(), None);
    }

    #[test]
    fn test_reinsert_keeps_position() {
        let mut map = LinkedMap::new();
        map.insert_if_absent(1u32, 10);
        map.insert_if_absent(2, 20);
        assert!(!map.insert_if_absent(1, 99));

        assert_eq!(map.front_key(), Some(1));
        assert_eq!(map.get_mut(&1), Some(&mut 10));
    }

    #[test]
    fn test_remove_middle() {
        let mut map = LinkedMap::new();
        for k in 0u32..5 {
            map.insert_if_absent(k, k * 10);
        }
        assert_eq!(map.remove(&2), Some(20));
        assert_eq!(map.len(), 4);

        let keys: Vec<_> = map.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_removed_key_goes_to_back_when_reinserted() {
        let mut map = LinkedMap::new();
        map.insert_if_absent(1u32, ());
        map.insert_if_absent(2, ());
        map.remove(&1);
        map.insert_if_absent(1, ());

        assert_eq!(map.front_key(), Some(2));
    }
}
