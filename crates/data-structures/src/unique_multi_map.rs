use hashbrown::HashMap;
use smallvec::SmallVec;

/// A map from key to a set of values, with the added invariant that each
/// value belongs to at most one key.
///
/// This is the shape an `IndexSet` needs for a single column: `insert` maps
/// a cell value to the row ids that hold it (most cell values are unique to
/// one row, hence the inline capacity of 1), while `remove_value` lets a
/// row removal find and drop its entry by row id alone, without knowing
/// which cell value it was filed under.
#[derive(Clone, Debug)]
pub struct UniqueMultiMap<K, V> {
    by_key: HashMap<K, SmallVec<[V; 1]>, ahash::RandomState>,
    key_of: HashMap<V, K, ahash::RandomState>,
}

impl<K, V> Default for UniqueMultiMap<K, V> {
    fn default() -> Self {
        Self {
            by_key: HashMap::default(),
            key_of: HashMap::default(),
        }
    }
}

impl<K, V> UniqueMultiMap<K, V>
where
    K: Eq + std::hash::Hash + Clone,
    V: Eq + std::hash::Hash + Copy,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.key_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_of.is_empty()
    }

    /// Inserts `value` under `key`. Returns `false` without modifying the
    /// map if `value` already belongs to a (possibly different) key.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.key_of.contains_key(&value) {
            return false;
        }
        self.key_of.insert(value, key.clone());
        self.by_key.entry(key).or_default().push(value);
        true
    }

    /// Removes `value` wherever it's filed, returning the key it was under.
    pub fn remove_value(&mut self, value: &V) -> Option<K> {
        let key = self.key_of.remove(value)?;
        if let Some(values) = self.by_key.get_mut(&key) {
            values.retain(|v| v != value);
            if values.is_empty() {
                self.by_key.remove(&key);
            }
        }
        Some(key)
    }

    pub fn values_for(&self, key: &K) -> &[V] {
        self.by_key.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn key_for(&self, value: &V) -> Option<&K> {
        self.key_of.get(value)
    }

    pub fn contains_value(&self, value: &V) -> bool {
        self.key_of.contains_key(value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.by_key.keys()
    }
}
