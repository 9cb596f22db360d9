//! Ordered keyed store.
//!
//! A sorted map with O(log n) insert/find/delete and an explicit duplicate
//! policy. The vnode cache keys it by `(namespace, node)`, so a range scan
//! over one namespace doubles as that namespace's membership list.

use std::collections::BTreeMap;
use std::ops::RangeBounds;

/// What `insert` does when the key is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplicates {
    /// Refuse the insert.
    Reject,
    /// Keep every value; `find` and `delete` act on the oldest.
    Allow,
}

/// Returned by `insert` when the key exists and duplicates are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateKey;

#[derive(Debug)]
pub struct KeyedStore<K, V> {
    entries: BTreeMap<K, Vec<V>>,
    policy: Duplicates,
    len: usize,
}

impl<K: Ord, V> KeyedStore<K, V> {
    pub fn new(policy: Duplicates) -> Self {
        Self {
            entries: BTreeMap::new(),
            policy,
            len: 0,
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> Result<(), DuplicateKey> {
        let values = self.entries.entry(key).or_default();
        if !values.is_empty() && self.policy == Duplicates::Reject {
            return Err(DuplicateKey);
        }
        values.push(value);
        self.len += 1;
        Ok(())
    }

    pub fn find(&self, key: &K) -> Option<&V> {
        self.entries.get(key).and_then(|values| values.first())
    }

    /// Remove the oldest value stored under `key`.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        let values = self.entries.get_mut(key)?;
        let value = values.remove(0);
        if values.is_empty() {
            self.entries.remove(key);
        }
        self.len -= 1;
        Some(value)
    }

    /// Iterate `(key, value)` pairs whose key falls in `range`, in key order.
    pub fn range<R>(&self, range: R) -> impl Iterator<Item = (&K, &V)>
    where
        R: RangeBounds<K>,
    {
        self.entries
            .range(range)
            .flat_map(|(k, values)| values.iter().map(move |v| (k, v)))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
