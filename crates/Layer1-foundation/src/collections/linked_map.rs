//! Insertion-ordered map with explicit touch semantics
//!
//! An ordered key list plus a key -> value map. Iteration runs oldest to
//! newest; touching a key moves it to one end.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Where `set` places the key in the iteration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Touch {
    /// Keep the current position (append if new)
    None,
    /// Move to the front
    AsOld,
    /// Move to the back
    AsNew,
}

#[derive(Debug, Clone)]
pub struct LinkedMap<K, V> {
    order: VecDeque<K>,
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> Default for LinkedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V> LinkedMap<K, V> {
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn set(&mut self, key: K, value: V, touch: Touch) {
        let existed = self.entries.insert(key.clone(), value).is_some();
        match (existed, touch) {
            (true, Touch::None) => {}
            (false, Touch::None) | (false, Touch::AsNew) => self.order.push_back(key),
            (false, Touch::AsOld) => self.order.push_front(key),
            (true, Touch::AsOld) => {
                self.unlink(&key);
                self.order.push_front(key);
            }
            (true, Touch::AsNew) => {
                self.unlink(&key);
                self.order.push_back(key);
            }
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.unlink(key);
        Some(value)
    }

    /// Keys from oldest to newest
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|v| (k, v)))
    }

    /// Remove every entry whose value matches `pred`
    pub fn retain(&mut self, mut pred: impl FnMut(&K, &V) -> bool) {
        let entries = &mut self.entries;
        self.order.retain(|k| match entries.get(k) {
            Some(v) if pred(k, v) => true,
            _ => {
                entries.remove(k);
                false
            }
        });
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    fn unlink(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order() {
        let mut map = LinkedMap::new();
        map.set("a", 1, Touch::None);
        map.set("b", 2, Touch::None);
        map.set("c", 3, Touch::None);
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_touch_as_old_moves_to_front() {
        let mut map = LinkedMap::new();
        map.set("a", 1, Touch::AsOld);
        map.set("b", 2, Touch::AsOld);
        map.set("a", 10, Touch::AsOld);
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(map.get(&"a"), Some(&10));
    }

    #[test]
    fn test_touch_as_new_moves_to_back() {
        let mut map = LinkedMap::new();
        map.set("a", 1, Touch::None);
        map.set("b", 2, Touch::None);
        map.set("a", 3, Touch::AsNew);
        assert_eq!(map.values().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_remove_and_retain() {
        let mut map = LinkedMap::new();
        for (i, k) in ["a", "b", "c", "d"].into_iter().enumerate() {
            map.set(k, i, Touch::None);
        }
        assert_eq!(map.remove(&"b"), Some(1));
        assert_eq!(map.remove(&"b"), None);
        map.retain(|_, v| *v != 2);
        assert_eq!(map.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec!["a", "d"]);
        assert!(!map.contains_key(&"c"));
    }
}
