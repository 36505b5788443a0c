//! Sets: a [`Table`] whose value column is [`NoValues`].

use std::fmt;
use std::hash::{BuildHasher, Hash};

use crate::config::TableConfig;
use crate::error::Result;
use crate::occupancy::OccupancyTracker;
use crate::storage::{KeyStore, NoValues, SlotStore, SlotStoreMut};
use crate::table::Table;
use crate::FixedState;

/// Open-addressing hash set over a key store `KS`.
///
/// Shares the probing, tombstone and growth rules of [`Table`].
pub struct Set<KS, S = FixedState> {
    table: Table<KS, NoValues, S>,
}

impl<KS, S> Set<KS, S>
where
    KS: SlotStoreMut,
    S: BuildHasher + Default,
{
    /// Create an empty set with the default configuration.
    pub fn new() -> Self {
        Self::from_table(Table::new())
    }

    /// Create an empty set with `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_table(Table::with_capacity(capacity))
    }

    /// Create an empty set with the given configuration.
    pub fn with_config(config: TableConfig) -> Self {
        Self::from_table(Table::with_config(config))
    }
}

impl<KS, S> Set<KS, S> {
    pub(crate) fn from_table(table: Table<KS, NoValues, S>) -> Self {
        Self { table }
    }

    /// The underlying table (keys with a zero-width value column).
    pub fn as_table(&self) -> &Table<KS, NoValues, S> {
        &self.table
    }
}

impl<KS: SlotStore, S> Set<KS, S> {
    /// Number of keys.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns true if the set holds no keys.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Per-slot occupancy state.
    pub fn occupancy(&self) -> &OccupancyTracker {
        self.table.occupancy()
    }

    /// True if the set is backed by a mapped snapshot.
    pub fn is_read_only(&self) -> bool {
        self.table.is_read_only()
    }

    /// Iterate over keys in slot order.
    pub fn iter(&self) -> impl Iterator<Item = KS::Ref<'_>> + '_ {
        self.table.keys()
    }
}

impl<KS: SlotStore, S: BuildHasher> Set<KS, S> {
    /// True if `key` is in the set.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + ?Sized,
        KS: KeyStore<Q>,
    {
        self.table.contains(key)
    }

    /// The stored key equal to `key`, if any.
    pub fn get<Q>(&self, key: &Q) -> Option<KS::Ref<'_>>
    where
        Q: Hash + ?Sized,
        KS: KeyStore<Q>,
    {
        self.table.get_key_value(key).map(|(k, _)| k)
    }

    /// Erase `key`, returning whether it was present.
    pub fn erase<Q>(&mut self, key: &Q) -> Result<bool>
    where
        Q: Hash + ?Sized,
        KS: KeyStore<Q>,
    {
        self.table.erase(key)
    }
}

impl<KS, S> Set<KS, S>
where
    KS: SlotStoreMut + KeyStore<<KS as SlotStore>::Item>,
    KS::Item: Hash,
    S: BuildHasher,
{
    /// Add `key`, returning true if it was not already present.
    pub fn insert(&mut self, key: KS::Item) -> Result<bool> {
        self.table.insert(key, ()).map(|old| old.is_none())
    }

    /// Add every key from `iter`, stopping at the first error.
    pub fn try_extend<I>(&mut self, iter: I) -> Result<()>
    where
        I: IntoIterator<Item = KS::Item>,
    {
        self.table.try_extend(iter.into_iter().map(|k| (k, ())))
    }

    /// Grow so that `n` keys fit without further growth.
    pub fn reserve(&mut self, n: usize) -> Result<()> {
        self.table.reserve(n)
    }
}

impl<KS: SlotStoreMut, S> Set<KS, S> {
    /// Remove every key, keeping the capacity.
    pub fn clear(&mut self) -> Result<()> {
        self.table.clear()
    }
}

impl<KS, S> Default for Set<KS, S>
where
    KS: SlotStoreMut,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<KS: Clone, S: Clone> Clone for Set<KS, S> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<KS: SlotStore, S> fmt::Debug for Set<KS, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Set")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::tests::Colliding;
    use crate::{FlatHashSet, HashSet};

    #[test]
    fn test_basic_set_operations() {
        let mut s: HashSet<String> = HashSet::new();
        assert!(s.insert("x".into()).unwrap());
        assert!(s.insert("y".into()).unwrap());
        assert!(!s.insert("x".into()).unwrap());
        assert_eq!(s.len(), 2);
        assert!(s.contains("x"));
        assert_eq!(s.get("y").map(String::as_str), Some("y"));

        assert!(s.erase("x").unwrap());
        assert!(!s.erase("x").unwrap(), "erasing an absent key is a no-op");
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_colliding_set_keeps_chain() {
        let mut s: FlatHashSet<u32, Colliding> = FlatHashSet::with_capacity(8);
        s.try_extend([1, 2, 3]).unwrap();
        s.erase(&2).unwrap();
        assert!(s.contains(&3));
        assert!(!s.contains(&2));
        s.insert(4).unwrap();
        let keys: Vec<u32> = s.iter().copied().collect();
        assert_eq!(keys, vec![1, 4, 3]);
    }

    #[test]
    fn test_set_growth() {
        let mut s: FlatHashSet<u64> = FlatHashSet::new();
        for k in 0..100 {
            s.insert(k).unwrap();
        }
        assert_eq!(s.len(), 100);
        assert!((0..100).all(|k| s.contains(&k)));
        s.clear().unwrap();
        assert!(s.is_empty());
    }
}
