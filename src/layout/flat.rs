//! Flat layout: fixed-size keys and values written as raw arrays.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::Arc;

use bytemuck::Pod;
use log::debug;
use memmap2::Mmap;

use super::cursor::{ByteReader, ByteWriter};
use super::{column_align, map_file, FixedColumn, Mapper, Snapshot, REGION_ALIGN};
use crate::buffer::{Buffer, MappedRegion};
use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::occupancy::OccupancyTracker;
use crate::set::Set;
use crate::storage::{FlatSlots, NoValues};
use crate::table::Table;

const LEN: usize = 0;
const CAPACITY: usize = 8;
const LOAD_FACTOR: usize = 16;
const GROWTH_FACTOR: usize = 24;
const VALUE_OFFSET: usize = 32;
const TRACKER_OFFSET: usize = 40;
/// First byte of the key array.
pub(crate) const HEADER_LEN: usize = 48;

fn write_flat<K, VS, S>(table: &Table<FlatSlots<K>, VS, S>, path: &Path) -> io::Result<u64>
where
    K: Pod,
    VS: FixedColumn,
{
    let key_align = std::mem::align_of::<K>();
    if HEADER_LEN % key_align != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("key alignment {key_align} does not divide the {HEADER_LEN} byte header"),
        ));
    }

    let mut w = ByteWriter::new(BufWriter::new(File::create(path)?));
    w.put_u64(table.len() as u64)?;
    w.put_u64(table.capacity() as u64)?;
    w.put_f64(table.load_factor())?;
    w.put_f64(table.growth_factor())?;
    let value_at = w.placeholder_u64()?;
    let tracker_at = w.placeholder_u64()?;

    debug_assert_eq!(w.position(), HEADER_LEN as u64);
    w.put_bytes(table.key_store().as_bytes())?;

    w.pad_to(column_align(VS::ALIGN))?;
    let value_offset = w.position();
    w.put_bytes(table.value_store().column_bytes())?;

    w.pad_to(REGION_ALIGN)?;
    let tracker_offset = w.position();
    table.occupancy().write_to(&mut w)?;
    let size = w.position();

    w.patch_u64(value_at, value_offset)?;
    w.patch_u64(tracker_at, tracker_offset)?;
    w.into_inner()?;
    Ok(size)
}

/// Header fields of a flat snapshot.
struct FlatHeader {
    len: usize,
    capacity: usize,
    load_factor: f64,
    growth_factor: f64,
    value_offset: usize,
    tracker_offset: usize,
}

impl FlatHeader {
    fn parse(bytes: &[u8]) -> std::result::Result<Self, String> {
        let r = ByteReader::new(bytes);
        let header = Self {
            len: r.usize_at(LEN, "len")?,
            capacity: r.usize_at(CAPACITY, "capacity")?,
            load_factor: r.f64_at(LOAD_FACTOR, "load factor")?,
            growth_factor: r.f64_at(GROWTH_FACTOR, "growth factor")?,
            value_offset: r.usize_at(VALUE_OFFSET, "value offset")?,
            tracker_offset: r.usize_at(TRACKER_OFFSET, "occupancy offset")?,
        };
        if header.len > header.capacity {
            return Err(format!("len {} exceeds capacity {}", header.len, header.capacity));
        }
        if !(header.load_factor > 0.0 && header.load_factor <= 1.0) {
            return Err(format!("load factor {} outside (0, 1]", header.load_factor));
        }
        if !(header.growth_factor > 1.0 && header.growth_factor.is_finite()) {
            return Err(format!("growth factor {} not above 1", header.growth_factor));
        }
        Ok(header)
    }

    fn config(&self) -> TableConfig {
        TableConfig::default()
            .capacity(self.capacity)
            .load_factor(self.load_factor)
            .growth_factor(self.growth_factor)
    }
}

/// Parts of a flat snapshot, viewed in place.
type FlatParts<K, VS> = (FlatSlots<K>, VS, OccupancyTracker, FlatHeader);

fn map_flat<K, VS>(map: &Arc<Mmap>) -> std::result::Result<FlatParts<K, VS>, String>
where
    K: Pod,
    VS: FixedColumn,
{
    let header = FlatHeader::parse(map)?;
    let keys = MappedRegion::new(Arc::clone(map), HEADER_LEN, header.capacity)
        .map_err(|e| format!("key array: {e}"))?;
    let values =
        VS::map_column(map, header.value_offset, header.capacity).map_err(|e| format!("value array: {e}"))?;
    let occupancy = OccupancyTracker::from_mapped(Arc::clone(map), header.tracker_offset)?;
    if occupancy.len() != header.capacity {
        return Err(format!(
            "occupancy covers {} slots, table has {}",
            occupancy.len(),
            header.capacity
        ));
    }
    Ok((FlatSlots::from_buffer(Buffer::Mapped(keys)), values, occupancy, header))
}

impl<K, VS, S> Snapshot for Table<FlatSlots<K>, VS, S>
where
    K: Pod,
    VS: FixedColumn,
    S: Default,
{
    type Mapped = Self;

    fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let size = write_flat(self, path).map_err(|e| Error::io(path, e))?;
        debug!(
            "wrote flat snapshot {} ({} entries, {} slots, {size} bytes)",
            path.display(),
            self.len(),
            self.capacity()
        );
        Ok(())
    }

    fn open_with<M: Mapper + ?Sized>(path: impl AsRef<Path>, mapper: &M) -> Result<Self> {
        let path = path.as_ref();
        let map = map_file(path, mapper, HEADER_LEN)?;
        let (keys, values, occupancy, header) = map_flat(&map).map_err(|reason| Error::corrupt(path, reason))?;
        debug!(
            "opened flat snapshot {} ({} entries, {} slots)",
            path.display(),
            header.len,
            header.capacity
        );
        Ok(Table::from_parts(
            keys,
            values,
            occupancy,
            header.len,
            header.config(),
            S::default(),
        ))
    }
}

impl<K, S> Snapshot for Set<FlatSlots<K>, S>
where
    K: Pod,
    S: Default,
{
    type Mapped = Self;

    fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        self.as_table().write(path)
    }

    fn open_with<M: Mapper + ?Sized>(path: impl AsRef<Path>, mapper: &M) -> Result<Self> {
        Table::<FlatSlots<K>, NoValues, S>::open_with(path, mapper).map(Set::from_table)
    }
}
