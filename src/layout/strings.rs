//! String layout: one side of the table is variable-length strings.
//!
//! Strings cannot be laid out as an indexable array, so each slot gets a `u64`
//! offset pointing at a `(u32 length, bytes)` record. Records are written for
//! every slot that has ever been occupied, which keeps erased keys comparable
//! after reopening.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::Arc;

use bytemuck::Pod;
use log::debug;
use memmap2::Mmap;

use super::cursor::{padding, ByteReader, ByteWriter};
use super::{column_align, map_file, FixedColumn, Mapper, Snapshot, REGION_ALIGN};
use crate::buffer::MappedRegion;
use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::occupancy::OccupancyTracker;
use crate::set::Set;
use crate::storage::{ElementSlots, FlatSlots, MappedStrs, NoValues, StrColumn, NO_RECORD};
use crate::table::Table;

const LEN: usize = 0;
const CAPACITY: usize = 8;
const FIXED_OFFSET: usize = 16;
const TRACKER_OFFSET: usize = 24;
/// First byte of the per-slot offset table.
pub(crate) const HEADER_LEN: usize = 32;

const RECORD_ALIGN: u64 = 4;

/// Byte offset of every slot's record, given where the records begin.
fn record_offsets<SC: StrColumn>(strs: &SC, occupancy: &OccupancyTracker, start: u64) -> io::Result<Vec<u64>> {
    let mut pos = start;
    (0..occupancy.len())
        .map(|slot| {
            if !occupancy.was_occupied(slot) {
                return Ok(NO_RECORD);
            }
            let at = pos;
            let len = strs.str_at(slot).len();
            if u32::try_from(len).is_err() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("string of {len} bytes in slot {slot} exceeds the u32 record length"),
                ));
            }
            pos += 4 + len as u64;
            pos += padding(pos, RECORD_ALIGN);
            Ok(at)
        })
        .collect()
}

fn write_strings<SC, FC>(
    path: &Path,
    len: usize,
    occupancy: &OccupancyTracker,
    strs: &SC,
    fixed: &FC,
) -> io::Result<u64>
where
    SC: StrColumn,
    FC: FixedColumn,
{
    let capacity = occupancy.len();
    let records_start = (HEADER_LEN + capacity * 8) as u64;
    let offsets = record_offsets(strs, occupancy, records_start)?;

    let mut w = ByteWriter::new(BufWriter::new(File::create(path)?));
    w.put_u64(len as u64)?;
    w.put_u64(capacity as u64)?;
    let fixed_at = w.placeholder_u64()?;
    let tracker_at = w.placeholder_u64()?;

    for &offset in &offsets {
        w.put_u64(offset)?;
    }
    for (slot, &offset) in offsets.iter().enumerate() {
        if offset == NO_RECORD {
            continue;
        }
        debug_assert_eq!(w.position(), offset);
        let s = strs.str_at(slot);
        w.put_u32(s.len() as u32)?;
        w.put_bytes(s.as_bytes())?;
        w.pad_to(RECORD_ALIGN)?;
    }

    w.pad_to(column_align(FC::ALIGN))?;
    let fixed_offset = w.position();
    w.put_bytes(fixed.column_bytes())?;

    w.pad_to(REGION_ALIGN)?;
    let tracker_offset = w.position();
    occupancy.write_to(&mut w)?;
    let size = w.position();

    w.patch_u64(fixed_at, fixed_offset)?;
    w.patch_u64(tracker_at, tracker_offset)?;
    w.into_inner()?;
    Ok(size)
}

/// Header fields of a string snapshot.
struct StrHeader {
    len: usize,
    capacity: usize,
    fixed_offset: usize,
    tracker_offset: usize,
}

impl StrHeader {
    fn parse(bytes: &[u8]) -> std::result::Result<Self, String> {
        let r = ByteReader::new(bytes);
        let header = Self {
            len: r.usize_at(LEN, "len")?,
            capacity: r.usize_at(CAPACITY, "capacity")?,
            fixed_offset: r.usize_at(FIXED_OFFSET, "fixed array offset")?,
            tracker_offset: r.usize_at(TRACKER_OFFSET, "occupancy offset")?,
        };
        if header.len > header.capacity {
            return Err(format!("len {} exceeds capacity {}", header.len, header.capacity));
        }
        Ok(header)
    }
}

/// The three mapped regions of a string snapshot plus its header.
struct StrParts<FC> {
    strs: MappedStrs,
    fixed: FC,
    occupancy: OccupancyTracker,
    header: StrHeader,
}

impl<FC: FixedColumn> StrParts<FC> {
    fn map(map: &Arc<Mmap>) -> std::result::Result<Self, String> {
        let header = StrHeader::parse(map)?;
        let offsets = MappedRegion::<u64>::new(Arc::clone(map), HEADER_LEN, header.capacity)
            .map_err(|e| format!("record offsets: {e}"))?;
        let fixed = FC::map_column(map, header.fixed_offset, header.capacity)
            .map_err(|e| format!("fixed array: {e}"))?;
        let occupancy = OccupancyTracker::from_mapped(Arc::clone(map), header.tracker_offset)?;
        if occupancy.len() != header.capacity {
            return Err(format!(
                "occupancy covers {} slots, table has {}",
                occupancy.len(),
                header.capacity
            ));
        }
        Ok(Self {
            strs: MappedStrs::new(Arc::clone(map), offsets),
            fixed,
            occupancy,
            header,
        })
    }

    fn open<M: Mapper + ?Sized>(path: &Path, mapper: &M) -> Result<Self> {
        let map = map_file(path, mapper, HEADER_LEN)?;
        let parts = Self::map(&map).map_err(|reason| Error::corrupt(path, reason))?;
        debug!(
            "opened string snapshot {} ({} entries, {} slots)",
            path.display(),
            parts.header.len,
            parts.header.capacity
        );
        Ok(parts)
    }

    fn config(&self) -> TableConfig {
        TableConfig::default().capacity(self.header.capacity)
    }
}

fn log_written(path: &Path, len: usize, capacity: usize, size: u64) {
    debug!(
        "wrote string snapshot {} ({len} entries, {capacity} slots, {size} bytes)",
        path.display()
    );
}

/// String keys, fixed-size values (and string sets, via [`NoValues`]).
impl<VS, S> Snapshot for Table<ElementSlots<String>, VS, S>
where
    VS: FixedColumn,
    S: Default,
{
    type Mapped = Table<MappedStrs, VS, S>;

    fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let size = write_strings(path, self.len(), self.occupancy(), self.key_store(), self.value_store())
            .map_err(|e| Error::io(path, e))?;
        log_written(path, self.len(), self.capacity(), size);
        Ok(())
    }

    fn open_with<M: Mapper + ?Sized>(path: impl AsRef<Path>, mapper: &M) -> Result<Self::Mapped> {
        let parts = StrParts::<VS>::open(path.as_ref(), mapper)?;
        let config = parts.config();
        Ok(Table::from_parts(
            parts.strs,
            parts.fixed,
            parts.occupancy,
            parts.header.len,
            config,
            S::default(),
        ))
    }
}

/// Fixed-size keys, string values.
impl<K, S> Snapshot for Table<FlatSlots<K>, ElementSlots<String>, S>
where
    K: Pod,
    S: Default,
{
    type Mapped = Table<FlatSlots<K>, MappedStrs, S>;

    fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let size = write_strings(path, self.len(), self.occupancy(), self.value_store(), self.key_store())
            .map_err(|e| Error::io(path, e))?;
        log_written(path, self.len(), self.capacity(), size);
        Ok(())
    }

    fn open_with<M: Mapper + ?Sized>(path: impl AsRef<Path>, mapper: &M) -> Result<Self::Mapped> {
        let parts = StrParts::<FlatSlots<K>>::open(path.as_ref(), mapper)?;
        let config = parts.config();
        Ok(Table::from_parts(
            parts.fixed,
            parts.strs,
            parts.occupancy,
            parts.header.len,
            config,
            S::default(),
        ))
    }
}

impl<S: Default> Snapshot for Set<ElementSlots<String>, S> {
    type Mapped = Set<MappedStrs, S>;

    fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        self.as_table().write(path)
    }

    fn open_with<M: Mapper + ?Sized>(path: impl AsRef<Path>, mapper: &M) -> Result<Self::Mapped> {
        Table::<ElementSlots<String>, NoValues, S>::open_with(path, mapper).map(Set::from_table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::tests::Colliding;
    use crate::{MappedStrSet, StrKeyMap, StrSet, StrValueMap};
    use std::fs;
    use test_log::test;

    #[test]
    fn test_string_keys_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.tbl");
        let mut m: StrKeyMap<u32> = StrKeyMap::new();
        for (i, word) in ["alpha", "beta", "gamma", "δέλτα", ""].iter().enumerate() {
            m.insert(word.to_string(), i as u32).unwrap();
        }
        m.write(&path).unwrap();

        let mut mapped = StrKeyMap::<u32>::open(&path).unwrap();
        assert!(mapped.is_read_only());
        assert_eq!(mapped.len(), 5);
        assert_eq!(mapped.get("alpha"), Some(&0));
        assert_eq!(mapped.get("δέλτα"), Some(&3));
        assert_eq!(mapped.get(""), Some(&4));
        assert_eq!(*mapped.at("gamma").unwrap(), 2);
        assert!(!mapped.contains("epsilon"));
        assert!(mapped.contains(&"beta".to_string()));

        let mut pairs: Vec<(String, u32)> = mapped.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        pairs.sort();
        assert_eq!(pairs[0], (String::new(), 4));
        assert_eq!(pairs[1], ("alpha".to_string(), 0));

        assert!(mapped.erase("alpha").unwrap_err().is_read_only());
    }

    #[test]
    fn test_string_values_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.tbl");
        let mut m: StrValueMap<u64> = StrValueMap::new();
        for id in 0..200u64 {
            m.insert(id, format!("user-{id}")).unwrap();
        }
        m.write(&path).unwrap();

        let mapped = StrValueMap::<u64>::open(&path).unwrap();
        assert_eq!(mapped.len(), 200);
        assert_eq!(mapped.get(&17), Some("user-17"));
        assert_eq!(mapped.get(&199), Some("user-199"));
        assert_eq!(mapped.get(&200), None);
        for (k, v) in &m {
            assert_eq!(mapped.get(k), Some(v.as_str()));
        }
    }

    #[test]
    fn test_string_set_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.tbl");
        let mut s: StrSet = StrSet::new();
        s.try_extend(["red", "green", "blue"].map(String::from)).unwrap();
        s.write(&path).unwrap();

        let mapped: MappedStrSet = StrSet::open(&path).unwrap();
        assert_eq!(mapped.len(), 3);
        assert!(mapped.contains("green"));
        assert!(!mapped.contains("yellow"));
    }

    #[test]
    fn test_erased_key_stays_absent_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("erased.tbl");
        let mut m: StrKeyMap<u8, Colliding> = StrKeyMap::with_capacity(8);
        m.insert("a".into(), 1).unwrap();
        m.insert("b".into(), 2).unwrap();
        m.erase("a").unwrap();
        m.write(&path).unwrap();

        let mapped = StrKeyMap::<u8, Colliding>::open(&path).unwrap();
        assert!(!mapped.contains("a"));
        assert_eq!(mapped.get("b"), Some(&2), "probe continues past the erased slot");
    }

    #[test]
    fn test_record_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.tbl");
        let mut m: StrKeyMap<u16> = StrKeyMap::with_capacity(4);
        m.insert("hello".into(), 7).unwrap();
        m.write(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        let r = ByteReader::new(&bytes);
        assert_eq!(r.u64_at(LEN, "len").unwrap(), 1);
        assert_eq!(r.u64_at(CAPACITY, "capacity").unwrap(), 4);

        let records_start = HEADER_LEN + 4 * 8;
        let offsets: Vec<u64> = (0..4).map(|i| r.u64_at(HEADER_LEN + i * 8, "offset").unwrap()).collect();
        assert_eq!(offsets.iter().filter(|&&o| o == NO_RECORD).count(), 3);
        let record = *offsets.iter().find(|&&o| o != NO_RECORD).unwrap() as usize;
        assert_eq!(record, records_start);
        assert_eq!(u32::from_ne_bytes(bytes[record..record + 4].try_into().unwrap()), 5);
        assert_eq!(&bytes[record + 4..record + 9], b"hello");

        // 4 + 5 bytes, padded to 12, then aligned to 8 for the value array.
        let fixed_offset = r.usize_at(FIXED_OFFSET, "fixed").unwrap();
        assert_eq!(fixed_offset, records_start + 16);
        let tracker_offset = r.usize_at(TRACKER_OFFSET, "tracker").unwrap();
        assert_eq!(tracker_offset, fixed_offset + 8);
        assert_eq!(bytes.len(), tracker_offset + 8 + 4);
    }

    #[test]
    fn test_corrupt_offset_table_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tbl");
        let mut m: StrKeyMap<u64> = StrKeyMap::new();
        m.insert("x".into(), 1).unwrap();
        m.write(&path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[FIXED_OFFSET..FIXED_OFFSET + 8].copy_from_slice(&u64::MAX.to_ne_bytes());
        fs::write(&path, &bytes).unwrap();
        let err = StrKeyMap::<u64>::open(&path).unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }), "{err}");
    }
}
