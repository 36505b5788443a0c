//! Slot storage strategies.
//!
//! A table keeps its keys and values in two parallel slot arrays. How a slot
//! is read, written and moved depends on the strategy:
//!
//! - [`ElementSlots`]: a `Vec<T>` of default-constructed elements. Works for
//!   any `T: Default` (strings, boxed data, ...); slots move with `mem::take`.
//! - [`FlatSlots`]: a flat [`Buffer`] of bit-copyable `T: Pod`. Slots move by
//!   copy, and the array can be reinterpreted in place from a mapped snapshot.
//! - [`NoValues`]: zero-width value column used by sets.
//! - [`MappedStrs`]: read-only view over length-prefixed string records in a
//!   mapped snapshot.
//!
//! The probing algorithm in [`crate::table`] is written once against these
//! traits.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use memmap2::Mmap;

use crate::buffer::{Buffer, MappedRegion};
use crate::error::Result;

/// Offset-table entry for a slot that never held a string.
pub(crate) const NO_RECORD: u64 = u64::MAX;

/// Read access to a slot array.
pub trait SlotStore {
    /// Owned element type.
    type Item;

    /// What reads hand out: `&Item` for in-memory stores, `&str` for mapped
    /// strings, `()` for sets.
    type Ref<'a>: Copy
    where
        Self: 'a;

    /// Number of slots.
    fn slots(&self) -> usize;

    /// True if the slots live in a mapped snapshot.
    fn is_mapped(&self) -> bool;

    /// Element in `slot`. Unoccupied slots hold an unspecified value.
    fn get(&self, slot: usize) -> Self::Ref<'_>;
}

/// Write access to a slot array.
///
/// Implemented by every store that can be built in memory. Mapped stores
/// reject writes with [`Error::ReadOnly`](crate::Error::ReadOnly).
pub trait SlotStoreMut: SlotStore + Sized {
    /// A store of `slots` slots holding placeholder values.
    fn with_slots(slots: usize) -> Self;

    /// Mutable element in `slot`.
    fn get_mut(&mut self, slot: usize) -> Result<&mut Self::Item>;

    /// Overwrite `slot`, returning its previous content.
    fn replace(&mut self, slot: usize, item: Self::Item) -> Result<Self::Item>;

    /// Move the element out of `slot`, leaving a placeholder.
    fn take(&mut self, slot: usize) -> Result<Self::Item>;

    /// Overwrite `slot`.
    fn put(&mut self, slot: usize, item: Self::Item) -> Result<()> {
        self.replace(slot, item).map(drop)
    }
}

/// Key comparison against a borrowed lookup form `Q`.
pub trait KeyStore<Q: ?Sized>: SlotStore {
    /// True if the key stored in `slot` equals `key`.
    fn matches(&self, slot: usize, key: &Q) -> bool;
}

// =============================================================================
// Element container storage
// =============================================================================

/// Slots held as ordinary elements, default-constructed when unused.
#[derive(Clone, Debug)]
pub struct ElementSlots<T> {
    items: Vec<T>,
}

impl<T> SlotStore for ElementSlots<T> {
    type Item = T;
    type Ref<'a> = &'a T where Self: 'a;

    fn slots(&self) -> usize {
        self.items.len()
    }

    fn is_mapped(&self) -> bool {
        false
    }

    #[inline]
    fn get(&self, slot: usize) -> &T {
        &self.items[slot]
    }
}

impl<T: Default> SlotStoreMut for ElementSlots<T> {
    fn with_slots(slots: usize) -> Self {
        Self {
            items: std::iter::repeat_with(T::default).take(slots).collect(),
        }
    }

    fn get_mut(&mut self, slot: usize) -> Result<&mut T> {
        Ok(&mut self.items[slot])
    }

    fn replace(&mut self, slot: usize, item: T) -> Result<T> {
        Ok(std::mem::replace(&mut self.items[slot], item))
    }

    fn take(&mut self, slot: usize) -> Result<T> {
        Ok(std::mem::take(&mut self.items[slot]))
    }
}

impl<T, Q> KeyStore<Q> for ElementSlots<T>
where
    T: Borrow<Q>,
    Q: Eq + ?Sized,
{
    #[inline]
    fn matches(&self, slot: usize, key: &Q) -> bool {
        self.items[slot].borrow() == key
    }
}

// =============================================================================
// Flat buffer storage
// =============================================================================

/// Slots held in a flat array of bit-copyable values.
///
/// Backed by a [`Buffer`], so the same store type serves both a table built
/// in memory and one reopened from a snapshot.
#[derive(Clone, Debug)]
pub struct FlatSlots<T: Pod> {
    buf: Buffer<T>,
}

impl<T: Pod> FlatSlots<T> {
    pub(crate) fn from_buffer(buf: Buffer<T>) -> Self {
        Self { buf }
    }

    /// Raw bytes of the whole slot array.
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    /// Every slot, occupied or not.
    pub fn as_slice(&self) -> &[T] {
        self.buf.as_slice()
    }
}

impl<T: Pod> SlotStore for FlatSlots<T> {
    type Item = T;
    type Ref<'a> = &'a T where Self: 'a;

    fn slots(&self) -> usize {
        self.buf.len()
    }

    fn is_mapped(&self) -> bool {
        self.buf.is_mapped()
    }

    #[inline]
    fn get(&self, slot: usize) -> &T {
        &self.buf.as_slice()[slot]
    }
}

impl<T: Pod> SlotStoreMut for FlatSlots<T> {
    fn with_slots(slots: usize) -> Self {
        Self {
            buf: Buffer::zeroed(slots),
        }
    }

    fn get_mut(&mut self, slot: usize) -> Result<&mut T> {
        Ok(&mut self.buf.as_mut_slice("modify value")?[slot])
    }

    fn replace(&mut self, slot: usize, item: T) -> Result<T> {
        let slots = self.buf.as_mut_slice("write slot")?;
        Ok(std::mem::replace(&mut slots[slot], item))
    }

    fn take(&mut self, slot: usize) -> Result<T> {
        Ok(self.buf.as_slice()[slot])
    }
}

impl<T, Q> KeyStore<Q> for FlatSlots<T>
where
    T: Pod + Borrow<Q>,
    Q: Eq + ?Sized,
{
    #[inline]
    fn matches(&self, slot: usize, key: &Q) -> bool {
        self.buf.as_slice()[slot].borrow() == key
    }
}

// =============================================================================
// Sets
// =============================================================================

/// Zero-width value column; turns a table into a set.
#[derive(Clone, Debug, Default)]
pub struct NoValues {
    slots: usize,
    unit: (),
}

impl SlotStore for NoValues {
    type Item = ();
    type Ref<'a> = ();

    fn slots(&self) -> usize {
        self.slots
    }

    fn is_mapped(&self) -> bool {
        false
    }

    fn get(&self, _slot: usize) {}
}

impl SlotStoreMut for NoValues {
    fn with_slots(slots: usize) -> Self {
        Self { slots, unit: () }
    }

    fn get_mut(&mut self, _slot: usize) -> Result<&mut ()> {
        Ok(&mut self.unit)
    }

    fn replace(&mut self, _slot: usize, _item: ()) -> Result<()> {
        Ok(())
    }

    fn take(&mut self, _slot: usize) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Mapped strings
// =============================================================================

/// Strings read in place from a mapped snapshot.
///
/// A per-slot `u64` offset table points at `(u32 length, UTF-8 bytes)`
/// records. Slots that never held a string carry [`NO_RECORD`]. Records are
/// not validated up front; a corrupt record reads as the empty string.
#[derive(Clone)]
pub struct MappedStrs {
    map: Arc<Mmap>,
    offsets: Buffer<u64>,
}

impl MappedStrs {
    pub(crate) fn new(map: Arc<Mmap>, offsets: MappedRegion<u64>) -> Self {
        Self {
            map,
            offsets: Buffer::Mapped(offsets),
        }
    }

    fn record(&self, slot: usize) -> Option<&[u8]> {
        let offset = self.offsets.as_slice()[slot];
        if offset == NO_RECORD {
            return None;
        }
        let start = usize::try_from(offset).ok()?;
        let len_bytes = self.map.get(start..start.checked_add(4)?)?;
        let len = u32::from_ne_bytes(len_bytes.try_into().ok()?) as usize;
        let body = start + 4;
        self.map.get(body..body.checked_add(len)?)
    }
}

impl SlotStore for MappedStrs {
    type Item = String;
    type Ref<'a> = &'a str;

    fn slots(&self) -> usize {
        self.offsets.len()
    }

    fn is_mapped(&self) -> bool {
        true
    }

    fn get(&self, slot: usize) -> &str {
        self.record(slot)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .unwrap_or("")
    }
}

impl KeyStore<str> for MappedStrs {
    #[inline]
    fn matches(&self, slot: usize, key: &str) -> bool {
        self.record(slot) == Some(key.as_bytes())
    }
}

impl KeyStore<String> for MappedStrs {
    #[inline]
    fn matches(&self, slot: usize, key: &String) -> bool {
        self.record(slot) == Some(key.as_bytes())
    }
}

impl fmt::Debug for MappedStrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedStrs")
            .field("slots", &self.slots())
            .finish()
    }
}

/// A store that can be written into a snapshot as length-prefixed records.
pub trait StrColumn: SlotStore {
    /// String held in `slot`.
    fn str_at(&self, slot: usize) -> &str;
}

impl StrColumn for ElementSlots<String> {
    fn str_at(&self, slot: usize) -> &str {
        &self.items[slot]
    }
}

impl StrColumn for MappedStrs {
    fn str_at(&self, slot: usize) -> &str {
        self.get(slot)
    }
}
