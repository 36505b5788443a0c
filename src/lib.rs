//! # probemap
//!
//! Open-addressing hash maps and sets with linear probing, tombstone erasure
//! and zero-copy snapshots.
//!
//! One probing engine ([`Table`]) drives every variant. What differs is how
//! slots are stored:
//!
//! - [`HashMap`] / [`HashSet`]: ordinary elements (`String`, `Vec`, ...).
//! - [`FlatHashMap`] / [`FlatHashSet`]: bit-copyable [`Pod`](bytemuck::Pod)
//!   types in flat arrays, which can be written to a file and mapped back in
//!   without deserializing.
//! - [`StrKeyMap`], [`StrValueMap`], [`StrSet`]: strings on one side, written
//!   as length-prefixed records and read in place once mapped.
//!
//! Mapped tables are read-only; mutations fail with [`Error::ReadOnly`].
//! [`parallel_traverse`] folds a table on a [`ThreadPool`].
//!
//! ## Example
//!
//! ```rust
//! use probemap::HashMap;
//!
//! let mut m: HashMap<String, u32> = HashMap::new();
//! m.insert("hello".to_string(), 1)?;
//! m.insert("world".to_string(), 2)?;
//! m.erase("hello")?;
//!
//! assert!(!m.contains("hello"));
//! assert_eq!(m.get("world"), Some(&2));
//! assert_eq!(m.len(), 1);
//! # Ok::<(), probemap::Error>(())
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

mod buffer;
mod config;
mod error;
mod layout;
mod occupancy;
mod pool;
mod set;
mod storage;
mod table;
mod traverse;

pub use config::{PoolConfig, TableConfig, DEFAULT_GROWTH_FACTOR, DEFAULT_LOAD_FACTOR};
pub use error::{Error, Result};
pub use layout::{FixedColumn, Mapper, MmapMapper, Snapshot};
pub use occupancy::{OccupancyTracker, SlotState};
pub use pool::ThreadPool;
pub use set::Set;
pub use storage::{ElementSlots, FlatSlots, KeyStore, MappedStrs, NoValues, SlotStore, SlotStoreMut, StrColumn};
pub use table::{Iter, Table};
pub use traverse::{parallel_traverse, TraverseHandle};

/// Default hasher: deterministic across processes, so a snapshot written by
/// one process probes identically in another.
pub type FixedState = rustc_hash::FxBuildHasher;

// =============================================================================
// In-memory variants
// =============================================================================

/// Map over arbitrary `Default` keys and values.
pub type HashMap<K, V, S = FixedState> = Table<ElementSlots<K>, ElementSlots<V>, S>;

/// Map over bit-copyable keys and values; writable as a flat snapshot.
pub type FlatHashMap<K, V, S = FixedState> = Table<FlatSlots<K>, FlatSlots<V>, S>;

/// Set over arbitrary `Default` keys.
pub type HashSet<K, S = FixedState> = Set<ElementSlots<K>, S>;

/// Set over bit-copyable keys; writable as a flat snapshot.
pub type FlatHashSet<K, S = FixedState> = Set<FlatSlots<K>, S>;

/// String keys, bit-copyable values.
pub type StrKeyMap<V, S = FixedState> = Table<ElementSlots<String>, FlatSlots<V>, S>;

/// Bit-copyable keys, string values.
pub type StrValueMap<K, S = FixedState> = Table<FlatSlots<K>, ElementSlots<String>, S>;

/// Set of strings.
pub type StrSet<S = FixedState> = Set<ElementSlots<String>, S>;

// =============================================================================
// Mapped string variants
// =============================================================================

/// A [`StrKeyMap`] reopened from a snapshot.
pub type MappedStrKeyMap<V, S = FixedState> = Table<MappedStrs, FlatSlots<V>, S>;

/// A [`StrValueMap`] reopened from a snapshot.
pub type MappedStrValueMap<K, S = FixedState> = Table<FlatSlots<K>, MappedStrs, S>;

/// A [`StrSet`] reopened from a snapshot.
pub type MappedStrSet<S = FixedState> = Set<MappedStrs, S>;

#[cfg(test)]
mod proptests;
