//! The open-addressing probing engine.
//!
//! [`Table`] stores entries directly in a slot array and resolves collisions
//! by linear probing with wraparound. Erasure leaves a tombstone (see
//! [`crate::occupancy`]) so that probe chains passing through the slot stay
//! intact; tombstones are reclaimed only when the table is rehashed.
//!
//! Placement rule: an insert lands in the *first* erased-or-empty slot on its
//! probe path. Lookups rely on this: if the scan meets an erased slot still
//! holding the requested key, no live copy can exist further along, because a
//! re-insert would have claimed this slot or an earlier one.
//!
//! The algorithm is written once against the storage traits in
//! [`crate::storage`], so the same code drives element-backed maps, flat
//! bit-copyable maps, sets and tables reopened from a mapped snapshot.

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::ops::Range;

use log::debug;

use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::occupancy::{OccupancyTracker, SlotState};
use crate::storage::{KeyStore, SlotStore, SlotStoreMut};
use crate::FixedState;

/// Outcome of scanning a key's probe path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    /// Occupied slot holding the key.
    Found(usize),
    /// Key absent; first erased-or-empty slot on the path, if any.
    Vacant(Option<usize>),
}

#[inline]
fn home_slot(hash: u64, capacity: usize) -> usize {
    (hash % capacity as u64) as usize
}

/// Open-addressing hash table over a key store `KS` and a value store `VS`.
///
/// Most code uses one of the aliases in the crate root ([`HashMap`],
/// [`FlatHashMap`], ...) rather than naming the stores directly.
///
/// The table carries no internal locking. Any number of threads may read a
/// shared `&Table`; mutation requires `&mut`.
///
/// [`HashMap`]: crate::HashMap
/// [`FlatHashMap`]: crate::FlatHashMap
pub struct Table<KS, VS, S = FixedState> {
    keys: KS,
    values: VS,
    occupancy: OccupancyTracker,
    len: usize,
    config: TableConfig,
    hash_builder: S,
}

// =============================================================================
// Construction
// =============================================================================

impl<KS, VS, S> Table<KS, VS, S>
where
    KS: SlotStoreMut,
    VS: SlotStoreMut,
    S: BuildHasher + Default,
{
    /// Create an empty table with the default configuration.
    pub fn new() -> Self {
        Self::with_config(TableConfig::default())
    }

    /// Create an empty table with `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_config(TableConfig::default().capacity(capacity))
    }

    /// Create an empty table with the given configuration.
    ///
    /// # Panics
    /// Panics if the load factor is outside `(0, 1]` or the growth factor is
    /// not above 1.
    pub fn with_config(config: TableConfig) -> Self {
        Self::with_config_and_hasher(config, S::default())
    }
}

impl<KS, VS, S> Table<KS, VS, S>
where
    KS: SlotStoreMut,
    VS: SlotStoreMut,
{
    /// Create an empty table hashing with `hash_builder`.
    ///
    /// # Panics
    /// Same as [`with_config`](Self::with_config).
    pub fn with_config_and_hasher(config: TableConfig, hash_builder: S) -> Self {
        config.validate();
        Self {
            keys: KS::with_slots(config.capacity),
            values: VS::with_slots(config.capacity),
            occupancy: OccupancyTracker::new(config.capacity),
            len: 0,
            config,
            hash_builder,
        }
    }
}

impl<KS, VS, S> Table<KS, VS, S>
where
    KS: SlotStore,
    VS: SlotStore,
{
    /// Assemble a table from already-populated parts (snapshot loading).
    pub(crate) fn from_parts(
        keys: KS,
        values: VS,
        occupancy: OccupancyTracker,
        len: usize,
        config: TableConfig,
        hash_builder: S,
    ) -> Self {
        debug_assert_eq!(keys.slots(), occupancy.len());
        debug_assert_eq!(values.slots(), occupancy.len());
        Self {
            keys,
            values,
            occupancy,
            len,
            config,
            hash_builder,
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.occupancy.len()
    }

    /// The table's configuration (capacity reflects construction time).
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Occupancy ratio above which inserts trigger growth.
    pub fn load_factor(&self) -> f64 {
        self.config.load_factor
    }

    /// Capacity multiplier applied on growth.
    pub fn growth_factor(&self) -> f64 {
        self.config.growth_factor
    }

    /// The table's hash builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Per-slot occupancy state.
    pub fn occupancy(&self) -> &OccupancyTracker {
        &self.occupancy
    }

    pub(crate) fn key_store(&self) -> &KS {
        &self.keys
    }

    pub(crate) fn value_store(&self) -> &VS {
        &self.values
    }

    /// True if the table is backed by a mapped snapshot and rejects mutation.
    pub fn is_read_only(&self) -> bool {
        self.occupancy.is_mapped() || self.keys.is_mapped() || self.values.is_mapped()
    }

    fn ensure_writable(&self, operation: &'static str) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::read_only(operation));
        }
        Ok(())
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Iterate over `(key, value)` pairs in slot order.
    pub fn iter(&self) -> Iter<'_, KS, VS> {
        self.iter_slots(0..self.capacity())
    }

    /// Iterate over occupied slots whose index lies in `range`.
    ///
    /// # Panics
    /// Panics if `range` extends past [`capacity`](Self::capacity).
    pub fn iter_slots(&self, range: Range<usize>) -> Iter<'_, KS, VS> {
        assert!(
            range.end <= self.capacity(),
            "slot range {range:?} exceeds capacity {}",
            self.capacity()
        );
        Iter {
            keys: &self.keys,
            values: &self.values,
            occupancy: &self.occupancy,
            slots: range,
        }
    }

    /// Iterate over keys in slot order.
    pub fn keys(&self) -> impl Iterator<Item = KS::Ref<'_>> + '_ {
        self.iter().map(|(k, _)| k)
    }

    /// Iterate over values in slot order.
    pub fn values(&self) -> impl Iterator<Item = VS::Ref<'_>> + '_ {
        self.iter().map(|(_, v)| v)
    }
}

// =============================================================================
// Lookup
// =============================================================================

impl<KS, VS, S> Table<KS, VS, S>
where
    KS: SlotStore,
    VS: SlotStore,
    S: BuildHasher,
{
    fn probe<Q>(&self, key: &Q) -> Probe
    where
        Q: Hash + ?Sized,
        KS: KeyStore<Q>,
    {
        let capacity = self.capacity();
        if capacity == 0 {
            return Probe::Vacant(None);
        }

        let start = home_slot(self.hash_builder.hash_one(key), capacity);
        let mut slot = start;
        let mut free = None;
        loop {
            match self.occupancy.state(slot) {
                SlotState::Empty => return Probe::Vacant(free.or(Some(slot))),
                SlotState::Occupied => {
                    if self.keys.matches(slot, key) {
                        return Probe::Found(slot);
                    }
                }
                SlotState::Erased => {
                    let first_free = *free.get_or_insert(slot);
                    if self.keys.matches(slot, key) {
                        return Probe::Vacant(Some(first_free));
                    }
                }
            }
            slot += 1;
            if slot == capacity {
                slot = 0;
            }
            if slot == start {
                return Probe::Vacant(free);
            }
        }
    }

    fn find<Q>(&self, key: &Q) -> Option<usize>
    where
        Q: Hash + ?Sized,
        KS: KeyStore<Q>,
    {
        match self.probe(key) {
            Probe::Found(slot) => Some(slot),
            Probe::Vacant(_) => None,
        }
    }

    /// True if `key` is present.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + ?Sized,
        KS: KeyStore<Q>,
    {
        self.find(key).is_some()
    }

    /// Value stored for `key`, if any.
    pub fn get<Q>(&self, key: &Q) -> Option<VS::Ref<'_>>
    where
        Q: Hash + ?Sized,
        KS: KeyStore<Q>,
    {
        self.find(key).map(|slot| self.values.get(slot))
    }

    /// Stored key and value for `key`, if any.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(KS::Ref<'_>, VS::Ref<'_>)>
    where
        Q: Hash + ?Sized,
        KS: KeyStore<Q>,
    {
        self.find(key)
            .map(|slot| (self.keys.get(slot), self.values.get(slot)))
    }

    /// Value stored for `key`; fails with [`Error::KeyNotFound`] on a miss.
    pub fn at<Q>(&self, key: &Q) -> Result<VS::Ref<'_>>
    where
        Q: Hash + fmt::Debug + ?Sized,
        KS: KeyStore<Q>,
    {
        self.get(key).ok_or_else(|| Error::KeyNotFound {
            key: format!("{key:?}"),
        })
    }
}

// =============================================================================
// Mutation
// =============================================================================

impl<KS, VS, S> Table<KS, VS, S>
where
    KS: SlotStoreMut + KeyStore<<KS as SlotStore>::Item>,
    KS::Item: Hash,
    VS: SlotStoreMut,
    S: BuildHasher,
{
    /// Insert `key` with `value`, returning the previous value if the key was
    /// already present (its value is overwritten, the count is unchanged).
    ///
    /// Fails with [`Error::ReadOnly`] on a mapped table.
    pub fn insert(&mut self, key: KS::Item, value: VS::Item) -> Result<Option<VS::Item>> {
        self.insert_slot(key, value).map(|(_, old)| old)
    }

    fn insert_slot(&mut self, key: KS::Item, value: VS::Item) -> Result<(usize, Option<VS::Item>)> {
        self.ensure_writable("insert")?;

        let slot = match self.probe(&key) {
            Probe::Found(slot) => {
                let old = self.values.replace(slot, value)?;
                return Ok((slot, Some(old)));
            }
            Probe::Vacant(Some(slot)) if !self.at_load_limit() => slot,
            Probe::Vacant(_) => {
                self.rehash(self.config.grown(self.capacity()))?;
                self.first_empty(&key)
            }
        };

        self.keys.put(slot, key)?;
        self.values.put(slot, value)?;
        self.occupancy.set_occupied(slot)?;
        self.len += 1;
        Ok((slot, None))
    }

    fn at_load_limit(&self) -> bool {
        self.len as f64 >= self.capacity() as f64 * self.config.load_factor
    }

    /// First empty slot on `key`'s probe path. Only valid right after a
    /// rehash, when no erased slots exist and at least one slot is free.
    fn first_empty(&self, key: &KS::Item) -> usize {
        let capacity = self.capacity();
        let mut slot = home_slot(self.hash_builder.hash_one(key), capacity);
        while self.occupancy.is_occupied_or_was_occupied(slot) {
            slot = (slot + 1) % capacity;
        }
        slot
    }

    /// Rebuild into `capacity` fresh slots, dropping tombstones.
    fn rehash(&mut self, capacity: usize) -> Result<()> {
        debug_assert!(capacity > self.len);
        let mut keys = KS::with_slots(capacity);
        let mut values = VS::with_slots(capacity);
        let mut occupancy = OccupancyTracker::new(capacity);

        for old in 0..self.capacity() {
            if !self.occupancy.is_occupied(old) {
                continue;
            }
            let key = self.keys.take(old)?;
            let value = self.values.take(old)?;
            let mut slot = home_slot(self.hash_builder.hash_one(&key), capacity);
            while occupancy.is_occupied_or_was_occupied(slot) {
                slot = (slot + 1) % capacity;
            }
            keys.put(slot, key)?;
            values.put(slot, value)?;
            occupancy.set_occupied(slot)?;
        }

        debug!(
            "rehashed table: {} -> {} slots, {} entries",
            self.capacity(),
            capacity,
            self.len
        );
        self.keys = keys;
        self.values = values;
        self.occupancy = occupancy;
        Ok(())
    }

    /// Value for `key`, inserting `make()` first if absent.
    pub fn get_or_insert_with(
        &mut self,
        key: KS::Item,
        make: impl FnOnce() -> VS::Item,
    ) -> Result<&mut VS::Item> {
        self.ensure_writable("insert")?;
        let slot = match self.find(&key) {
            Some(slot) => slot,
            None => self.insert_slot(key, make())?.0,
        };
        self.values.get_mut(slot)
    }

    /// Value for `key`, inserting the default first if absent.
    pub fn get_or_insert_default(&mut self, key: KS::Item) -> Result<&mut VS::Item>
    where
        VS::Item: Default,
    {
        self.get_or_insert_with(key, Default::default)
    }

    /// Insert every pair from `iter`, stopping at the first error.
    pub fn try_extend<I>(&mut self, iter: I) -> Result<()>
    where
        I: IntoIterator<Item = (KS::Item, VS::Item)>,
    {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        self.reserve(self.len + lower)?;
        for (key, value) in iter {
            self.insert(key, value)?;
        }
        Ok(())
    }

    /// Grow so that `n` entries fit without further growth.
    ///
    /// Requests for `n <= len()` (and requests the current capacity already
    /// satisfies) leave the table untouched.
    pub fn reserve(&mut self, n: usize) -> Result<()> {
        self.ensure_writable("reserve")?;
        if n <= self.len {
            return Ok(());
        }
        let target = self.config.capacity_for(n);
        if target <= self.capacity() {
            return Ok(());
        }
        self.rehash(target)
    }

    /// Rebuild at the current capacity, reclaiming every tombstone.
    pub fn compact(&mut self) -> Result<()> {
        self.ensure_writable("compact")?;
        let capacity = self.capacity();
        if capacity == 0 {
            return Ok(());
        }
        self.rehash(capacity)
    }
}

impl<KS, VS, S> Table<KS, VS, S>
where
    KS: SlotStore,
    VS: SlotStoreMut,
    S: BuildHasher,
{
    /// Mutable access to the value stored for `key`.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Result<Option<&mut VS::Item>>
    where
        Q: Hash + ?Sized,
        KS: KeyStore<Q>,
    {
        self.ensure_writable("modify value")?;
        match self.find(key) {
            Some(slot) => self.values.get_mut(slot).map(Some),
            None => Ok(None),
        }
    }

    /// Remove `key`, returning its value. Absent keys are a no-op.
    pub fn remove<Q>(&mut self, key: &Q) -> Result<Option<VS::Item>>
    where
        Q: Hash + ?Sized,
        KS: KeyStore<Q>,
    {
        self.ensure_writable("erase")?;
        match self.probe(key) {
            Probe::Found(slot) => {
                self.occupancy.set_erased(slot)?;
                self.len -= 1;
                self.values.take(slot).map(Some)
            }
            Probe::Vacant(_) => Ok(None),
        }
    }

    /// Erase `key`, returning whether it was present.
    pub fn erase<Q>(&mut self, key: &Q) -> Result<bool>
    where
        Q: Hash + ?Sized,
        KS: KeyStore<Q>,
    {
        self.remove(key).map(|old| old.is_some())
    }
}

impl<KS, VS, S> Table<KS, VS, S>
where
    KS: SlotStoreMut,
    VS: SlotStoreMut,
{
    /// Remove every entry, keeping the capacity.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_writable("clear")?;
        let capacity = self.capacity();
        self.occupancy.clear()?;
        self.keys = KS::with_slots(capacity);
        self.values = VS::with_slots(capacity);
        self.len = 0;
        Ok(())
    }
}

impl<KS, VS, S> Default for Table<KS, VS, S>
where
    KS: SlotStoreMut,
    VS: SlotStoreMut,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<KS: Clone, VS: Clone, S: Clone> Clone for Table<KS, VS, S> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            values: self.values.clone(),
            occupancy: self.occupancy.clone(),
            len: self.len,
            config: self.config,
            hash_builder: self.hash_builder.clone(),
        }
    }
}

impl<KS: SlotStore, VS: SlotStore, S> fmt::Debug for Table<KS, VS, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("load_factor", &self.config.load_factor)
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

// =============================================================================
// Iterator
// =============================================================================

/// Iterator over occupied slots of a [`Table`], in slot order.
pub struct Iter<'a, KS, VS> {
    keys: &'a KS,
    values: &'a VS,
    occupancy: &'a OccupancyTracker,
    slots: Range<usize>,
}

impl<'a, KS: SlotStore, VS: SlotStore> Iterator for Iter<'a, KS, VS> {
    type Item = (KS::Ref<'a>, VS::Ref<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let occupancy = self.occupancy;
        let slot = self.slots.by_ref().find(|&slot| occupancy.is_occupied(slot))?;
        Some((self.keys.get(slot), self.values.get(slot)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.slots.len()))
    }
}

impl<KS: SlotStore, VS: SlotStore> Clone for Iter<'_, KS, VS> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys,
            values: self.values,
            occupancy: self.occupancy,
            slots: self.slots.clone(),
        }
    }
}

impl<'a, KS: SlotStore, VS: SlotStore, S> IntoIterator for &'a Table<KS, VS, S> {
    type Item = (KS::Ref<'a>, VS::Ref<'a>);
    type IntoIter = Iter<'a, KS, VS>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
