//! Snapshot files: binary layouts, writers and mapped loaders.
//!
//! A snapshot is a single file holding a table's slot arrays and occupancy
//! words at offsets recorded in a fixed header. Opening a snapshot maps the
//! file read-only and points the table's stores straight into the mapping;
//! nothing is deserialized and the result rejects mutation.
//!
//! Two layouts exist:
//!
//! - **flat** ([`flat`]): fixed-size keys and values.
//!   ```text
//!   [0]  u64  len
//!   [8]  u64  capacity
//!   [16] f64  load factor
//!   [24] f64  growth factor
//!   [32] u64  value array offset
//!   [40] u64  occupancy offset
//!   [48]      keys: capacity * size_of::<K>()
//!   [pad]     values: capacity * size_of::<V>()
//!   [pad 8]   occupancy: u64 bit count + u32 words
//!   ```
//! - **string** ([`strings`]): one side is strings, the other fixed-size.
//!   ```text
//!   [0]  u64  len
//!   [8]  u64  capacity
//!   [16] u64  fixed-side array offset
//!   [24] u64  occupancy offset
//!   [32]      per-slot u64 record offsets
//!             records: u32 length + UTF-8 bytes, padded to 4
//!   [pad]     fixed-side array
//!   [pad 8]   occupancy
//!   ```
//!
//! All integers are native-endian; a snapshot is only portable between
//! machines of the same endianness and pointer width.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytemuck::Pod;
use log::debug;
use memmap2::Mmap;

use crate::buffer::{Buffer, MappedRegion};
use crate::error::{Error, Result};
use crate::storage::{FlatSlots, NoValues, SlotStore, SlotStoreMut};

mod cursor;
pub(crate) mod flat;
pub(crate) mod strings;
mod tracker;

/// Alignment of every region boundary in a snapshot.
pub(crate) const REGION_ALIGN: u64 = 8;

// =============================================================================
// Mapping seam
// =============================================================================

/// Maps an opened snapshot file into memory.
///
/// [`MmapMapper`] is what [`Snapshot::open`] uses. Supplying another mapper
/// through [`Snapshot::open_with`] allows the mapping step to be observed or
/// made to fail.
pub trait Mapper {
    /// Map all of `file` read-only.
    fn map(&self, file: &File) -> io::Result<Mmap>;
}

/// Read-only `mmap` of the whole file.
#[derive(Debug, Clone, Copy, Default)]
pub struct MmapMapper;

impl Mapper for MmapMapper {
    fn map(&self, file: &File) -> io::Result<Mmap> {
        // SAFETY: snapshots are write-once files. The mapping is read-only and
        // callers must not truncate or rewrite a snapshot while it is open.
        unsafe { Mmap::map(file) }
    }
}

/// Open `path`, check it can hold `min_len` header bytes, and map it.
///
/// The descriptor is closed before returning in every case; the mapping
/// outlives it and is released when the last region referencing it drops.
pub(crate) fn map_file<M: Mapper + ?Sized>(path: &Path, mapper: &M, min_len: usize) -> Result<Arc<Mmap>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let size = file.metadata().map_err(|e| Error::io(path, e))?.len();
    if size < min_len as u64 {
        let source = io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("file is {size} bytes, header needs {min_len}"),
        );
        return Err(Error::io(path, source));
    }
    let map = mapper.map(&file).map_err(|source| Error::Mapping {
        path: path.to_path_buf(),
        source,
    })?;
    if map.len() as u64 != size {
        return Err(Error::Mapping {
            path: path.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("mapped {} bytes of a {size} byte file", map.len()),
            ),
        });
    }
    debug!("mapped snapshot {} ({size} bytes)", path.display());
    Ok(Arc::new(map))
}

// =============================================================================
// Persistence trait
// =============================================================================

/// A table or set that can be written to a snapshot and reopened from one.
///
/// Reopening yields [`Self::Mapped`]: the same type for fixed-size stores,
/// a [`MappedStrs`](crate::storage::MappedStrs)-backed type for string
/// stores. Either way the reopened table is read-only.
///
/// The reopened table hashes with `S::default()`, so `S` must produce the
/// same hashes in every process. [`FixedState`](crate::FixedState) does;
/// randomly seeded hashers do not.
///
/// ```no_run
/// use probemap::{FlatHashMap, Snapshot};
///
/// let mut m: FlatHashMap<u64, f64> = FlatHashMap::new();
/// m.insert(1, 0.5)?;
/// m.write("weights.tbl")?;
///
/// let mapped = FlatHashMap::<u64, f64>::open("weights.tbl")?;
/// assert_eq!(mapped.get(&1), Some(&0.5));
/// assert!(mapped.is_read_only());
/// # Ok::<(), probemap::Error>(())
/// ```
pub trait Snapshot: Sized {
    /// Type produced by [`open`](Self::open).
    type Mapped;

    /// Write a snapshot to `path`, replacing any existing file.
    fn write(&self, path: impl AsRef<Path>) -> Result<()>;

    /// Map the snapshot at `path`.
    fn open(path: impl AsRef<Path>) -> Result<Self::Mapped> {
        Self::open_with(path, &MmapMapper)
    }

    /// Map the snapshot at `path` using `mapper`.
    fn open_with<M: Mapper + ?Sized>(path: impl AsRef<Path>, mapper: &M) -> Result<Self::Mapped>;
}

// =============================================================================
// Fixed-size columns
// =============================================================================

/// A slot store laid out as a flat array in a snapshot.
pub trait FixedColumn: SlotStore + Sized {
    /// Required alignment of the array.
    const ALIGN: usize;

    /// Raw bytes of all slots.
    fn column_bytes(&self) -> &[u8];

    /// View `slots` elements at byte `offset` of `map`.
    fn map_column(map: &Arc<Mmap>, offset: usize, slots: usize) -> std::result::Result<Self, String>;
}

impl<T: Pod> FixedColumn for FlatSlots<T> {
    const ALIGN: usize = std::mem::align_of::<T>();

    fn column_bytes(&self) -> &[u8] {
        self.as_bytes()
    }

    fn map_column(map: &Arc<Mmap>, offset: usize, slots: usize) -> std::result::Result<Self, String> {
        let region = MappedRegion::new(Arc::clone(map), offset, slots)?;
        Ok(FlatSlots::from_buffer(Buffer::Mapped(region)))
    }
}

impl FixedColumn for NoValues {
    const ALIGN: usize = 1;

    fn column_bytes(&self) -> &[u8] {
        &[]
    }

    fn map_column(_map: &Arc<Mmap>, _offset: usize, slots: usize) -> std::result::Result<Self, String> {
        Ok(NoValues::with_slots(slots))
    }
}

/// Alignment used before writing a column of `align`-aligned elements.
pub(crate) fn column_align(align: usize) -> u64 {
    (align as u64).max(REGION_ALIGN)
}
