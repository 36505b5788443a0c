//! Packed two-bit-per-slot occupancy tracking.
//!
//! Each slot carries two flags packed into `u32` words, sixteen slots per word:
//! - bit 0: *is-set*, the slot currently holds an entry
//! - bit 1: *was-set*, the slot has held an entry since the last clear/resize
//!
//! Reachable states are `Empty` (neither flag), `Occupied` (both flags) and
//! `Erased` (was-set only).
//! Once was-set is 1 it stays 1 until the tracker is cleared or rebuilt, which
//! is what lets probe chains run through erased slots.

use std::io::{self, Write};
use std::sync::Arc;

use memmap2::Mmap;

use crate::buffer::{Buffer, MappedRegion};
use crate::error::Result;

const SLOTS_PER_WORD: usize = 16;
const IS_SET: u32 = 0b01;
const WAS_SET: u32 = 0b10;
const STATE_MASK: u32 = 0b11;
const IS_SET_BITS: u32 = 0x5555_5555;

/// Logical state of a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Never occupied since the last clear.
    Empty,
    /// Currently holds an entry.
    Occupied,
    /// Held an entry that was erased; probe chains continue through it.
    Erased,
}

#[inline]
fn locate(slot: usize) -> (usize, u32) {
    (slot / SLOTS_PER_WORD, ((slot % SLOTS_PER_WORD) * 2) as u32)
}

#[inline]
fn words_for(slots: usize) -> usize {
    slots.div_ceil(SLOTS_PER_WORD)
}

/// Two-bit-per-slot state store backing a table's slot array.
#[derive(Clone, Debug)]
pub struct OccupancyTracker {
    words: Buffer<u32>,
    slots: usize,
}

impl OccupancyTracker {
    /// A tracker for `slots` slots, all empty.
    pub fn new(slots: usize) -> Self {
        Self {
            words: Buffer::zeroed(words_for(slots)),
            slots,
        }
    }

    /// Number of slots tracked.
    pub fn len(&self) -> usize {
        self.slots
    }

    /// Returns true if no slots are tracked.
    pub fn is_empty(&self) -> bool {
        self.slots == 0
    }

    /// True if the words live in a mapped snapshot.
    pub fn is_mapped(&self) -> bool {
        self.words.is_mapped()
    }

    #[inline]
    fn bits(&self, slot: usize) -> u32 {
        debug_assert!(slot < self.slots, "slot {slot} out of range {}", self.slots);
        let (word, shift) = locate(slot);
        (self.words.as_slice()[word] >> shift) & STATE_MASK
    }

    #[inline]
    fn update(&mut self, slot: usize, operation: &'static str, f: impl FnOnce(u32, u32) -> u32) -> Result<()> {
        debug_assert!(slot < self.slots, "slot {slot} out of range {}", self.slots);
        let (word, shift) = locate(slot);
        let words = self.words.as_mut_slice(operation)?;
        words[word] = f(words[word], shift);
        Ok(())
    }

    /// Mark `slot` occupied (sets both flags).
    pub fn set_occupied(&mut self, slot: usize) -> Result<()> {
        self.update(slot, "mark slot occupied", |w, s| w | ((IS_SET | WAS_SET) << s))
    }

    /// Mark `slot` erased: clears is-set, leaves was-set.
    pub fn set_erased(&mut self, slot: usize) -> Result<()> {
        self.update(slot, "mark slot erased", |w, s| w & !(IS_SET << s))
    }

    /// Reset both flags of `slot`.
    ///
    /// Only sound on a freshly built tracker where no probe chain can pass
    /// through `slot`.
    pub fn clear_slot(&mut self, slot: usize) -> Result<()> {
        self.update(slot, "clear slot", |w, s| w & !(STATE_MASK << s))
    }

    /// True if `slot` currently holds an entry.
    #[inline]
    pub fn is_occupied(&self, slot: usize) -> bool {
        self.bits(slot) & IS_SET != 0
    }

    /// True if `slot` has held an entry since the last clear.
    #[inline]
    pub fn was_occupied(&self, slot: usize) -> bool {
        self.bits(slot) & WAS_SET != 0
    }

    /// True unless `slot` is [`SlotState::Empty`].
    #[inline]
    pub fn is_occupied_or_was_occupied(&self, slot: usize) -> bool {
        self.bits(slot) != 0
    }

    /// State of `slot`.
    pub fn state(&self, slot: usize) -> SlotState {
        match self.bits(slot) {
            0 => SlotState::Empty,
            b if b & IS_SET != 0 => SlotState::Occupied,
            _ => SlotState::Erased,
        }
    }

    /// Count of slots with is-set.
    pub fn occupied_count(&self) -> usize {
        let words = self.words.as_slice();
        let full = self.slots / SLOTS_PER_WORD;
        let mut count: usize = words[..full]
            .iter()
            .map(|w| (w & IS_SET_BITS).count_ones() as usize)
            .sum();
        let rem = self.slots % SLOTS_PER_WORD;
        if rem > 0 {
            let mask = IS_SET_BITS & ((1u32 << (rem * 2)) - 1);
            count += (words[full] & mask).count_ones() as usize;
        }
        count
    }

    /// Change the slot count, keeping existing flags and zero-filling growth.
    pub fn resize(&mut self, slots: usize) -> Result<()> {
        self.words.resize(words_for(slots))?;
        if slots < self.slots {
            let rem = slots % SLOTS_PER_WORD;
            if rem > 0 {
                let words = self.words.as_mut_slice("resize")?;
                words[slots / SLOTS_PER_WORD] &= (1u32 << (rem * 2)) - 1;
            }
        }
        self.slots = slots;
        Ok(())
    }

    /// Reset every slot to empty.
    pub fn clear(&mut self) -> Result<()> {
        self.words.as_mut_slice("clear")?.fill(0);
        Ok(())
    }

    /// Bytes [`write_to`](Self::write_to) produces.
    pub fn encoded_len(&self) -> usize {
        8 + self.words.as_bytes().len()
    }

    /// Serialize as `u64 bit count` followed by the packed `u32` words.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&((self.slots * 2) as u64).to_ne_bytes())?;
        w.write_all(self.words.as_bytes())
    }

    /// View a tracker serialized by [`write_to`](Self::write_to) at byte
    /// `offset` of `map`, without copying.
    pub fn from_mapped(map: Arc<Mmap>, offset: usize) -> std::result::Result<Self, String> {
        let header = offset
            .checked_add(8)
            .filter(|&end| end <= map.len())
            .map(|end| &map[offset..end])
            .ok_or_else(|| format!("occupancy header at {offset} exceeds file size {}", map.len()))?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(header);
        let bit_count = u64::from_ne_bytes(raw);
        if bit_count % 2 != 0 {
            return Err(format!("occupancy bit count {bit_count} is odd"));
        }
        let slots = usize::try_from(bit_count / 2)
            .map_err(|_| format!("occupancy bit count {bit_count} too large"))?;
        let region = MappedRegion::new(map, offset + 8, words_for(slots))?;
        Ok(Self {
            words: Buffer::Mapped(region),
            slots,
        })
    }
}
