//! Typed field access over snapshot bytes.
//!
//! [`ByteWriter`] tracks its own position so regions can be aligned and header
//! fields patched once the regions they point at have been written.
//! [`ByteReader`] reads header fields with bounds checks instead of raw
//! pointer arithmetic.

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Native-endian field writer with position tracking.
pub(crate) struct ByteWriter<W: Write + Seek> {
    inner: W,
    pos: u64,
}

impl<W: Write + Seek> ByteWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self { inner, pos: 0 }
    }

    /// Current byte offset from the start of the file.
    pub(crate) fn position(&self) -> u64 {
        self.pos
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    pub(crate) fn put_u32(&mut self, v: u32) -> io::Result<()> {
        self.put_bytes(&v.to_ne_bytes())
    }

    pub(crate) fn put_u64(&mut self, v: u64) -> io::Result<()> {
        self.put_bytes(&v.to_ne_bytes())
    }

    pub(crate) fn put_f64(&mut self, v: f64) -> io::Result<()> {
        self.put_bytes(&v.to_ne_bytes())
    }

    /// Write a zero placeholder and return its offset for [`patch_u64`](Self::patch_u64).
    pub(crate) fn placeholder_u64(&mut self) -> io::Result<u64> {
        let at = self.pos;
        self.put_u64(0)?;
        Ok(at)
    }

    /// Zero-pad up to the next multiple of `align`.
    pub(crate) fn pad_to(&mut self, align: u64) -> io::Result<()> {
        let pad = padding(self.pos, align);
        io::copy(&mut io::repeat(0).take(pad), self)?;
        Ok(())
    }

    /// Overwrite the `u64` at `at`, then return to the end.
    pub(crate) fn patch_u64(&mut self, at: u64, v: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(at))?;
        self.inner.write_all(&v.to_ne_bytes())?;
        self.inner.seek(SeekFrom::Start(self.pos))?;
        Ok(())
    }

    pub(crate) fn into_inner(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for ByteWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Bytes needed to bring `pos` to a multiple of `align`, a power of two.
pub(crate) fn padding(pos: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (align - pos % align) % align
}

/// Bounds-checked native-endian field reader.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn field<const N: usize>(&self, offset: usize, name: &str) -> Result<[u8; N], String> {
        offset
            .checked_add(N)
            .and_then(|end| self.bytes.get(offset..end))
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| format!("{name} at offset {offset} lies past end of file"))
    }

    pub(crate) fn u64_at(&self, offset: usize, name: &str) -> Result<u64, String> {
        self.field::<8>(offset, name).map(u64::from_ne_bytes)
    }

    /// A `u64` field that must fit in `usize` (counts and offsets).
    pub(crate) fn usize_at(&self, offset: usize, name: &str) -> Result<usize, String> {
        let v = self.u64_at(offset, name)?;
        usize::try_from(v).map_err(|_| format!("{name} {v} does not fit in usize"))
    }

    pub(crate) fn f64_at(&self, offset: usize, name: &str) -> Result<f64, String> {
        self.field::<8>(offset, name).map(f64::from_ne_bytes)
    }
}
