//! Typed slot storage that is either heap-owned or borrowed from a mapping.
//!
//! Every array a table reads (keys, values, occupancy words) lives in a
//! [`Buffer`]. Owned buffers are mutable; mapped buffers point into the bytes
//! of an open snapshot and reject mutation with [`Error::ReadOnly`].

use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;

use bytemuck::Pod;
use memmap2::Mmap;

use crate::error::{Error, Result};

/// A typed array, owned on the heap or viewed in place inside a mapping.
pub enum Buffer<T: Pod> {
    /// Heap storage, freely mutable.
    Owned(Vec<T>),
    /// Read-only view of `range` bytes inside a shared mapping.
    Mapped(MappedRegion<T>),
}

/// Byte range of a mapping reinterpreted as `[T]`.
///
/// Holds the mapping alive for as long as any region of it is referenced.
pub struct MappedRegion<T: Pod> {
    map: Arc<Mmap>,
    range: Range<usize>,
    _marker: PhantomData<T>,
}

impl<T: Pod> MappedRegion<T> {
    /// View `len` elements of `T` starting at byte `offset` of `map`.
    ///
    /// Fails with a reason when the range runs past the mapping or is not
    /// aligned for `T`.
    pub fn new(map: Arc<Mmap>, offset: usize, len: usize) -> std::result::Result<Self, String> {
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| format!("array of {len} elements overflows"))?;
        let end = offset
            .checked_add(bytes)
            .filter(|&end| end <= map.len())
            .ok_or_else(|| {
                format!(
                    "region {offset}..{} exceeds file size {}",
                    offset.saturating_add(bytes),
                    map.len()
                )
            })?;
        if bytes > 0 {
            bytemuck::try_cast_slice::<u8, T>(&map[offset..end])
                .map_err(|e| format!("region at {offset} cannot hold {}: {e}", std::any::type_name::<T>()))?;
        }
        Ok(Self {
            map,
            range: offset..end,
            _marker: PhantomData,
        })
    }

    fn as_slice(&self) -> &[T] {
        if self.range.is_empty() {
            return &[];
        }
        bytemuck::cast_slice(&self.map[self.range.clone()])
    }
}

impl<T: Pod> Clone for MappedRegion<T> {
    fn clone(&self) -> Self {
        Self {
            map: Arc::clone(&self.map),
            range: self.range.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Pod> Buffer<T> {
    /// Owned buffer of `len` zeroed elements.
    pub fn zeroed(len: usize) -> Self {
        Buffer::Owned(vec![T::zeroed(); len])
    }

    /// True if this buffer views a mapped snapshot.
    pub fn is_mapped(&self) -> bool {
        matches!(self, Buffer::Mapped(_))
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Elements as a slice, regardless of ownership.
    pub fn as_slice(&self) -> &[T] {
        match self {
            Buffer::Owned(v) => v.as_slice(),
            Buffer::Mapped(region) => region.as_slice(),
        }
    }

    /// Raw bytes of the elements, as written to a snapshot.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }

    /// Mutable elements; fails on a mapped buffer.
    pub fn as_mut_slice(&mut self, operation: &'static str) -> Result<&mut [T]> {
        match self {
            Buffer::Owned(v) => Ok(v.as_mut_slice()),
            Buffer::Mapped(_) => Err(Error::read_only(operation)),
        }
    }

    /// Resize an owned buffer, zero-filling new elements.
    pub fn resize(&mut self, len: usize) -> Result<()> {
        match self {
            Buffer::Owned(v) => {
                v.resize(len, T::zeroed());
                Ok(())
            }
            Buffer::Mapped(_) => Err(Error::read_only("resize")),
        }
    }
}

impl<T: Pod> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        match self {
            Buffer::Owned(v) => Buffer::Owned(v.clone()),
            Buffer::Mapped(region) => Buffer::Mapped(region.clone()),
        }
    }
}

impl<T: Pod> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_mapped() { "Mapped" } else { "Owned" };
        f.debug_struct("Buffer")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}
