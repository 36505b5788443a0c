//! End-to-end snapshot scenarios through the public API.

use std::cell::Cell;
use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;
use probemap::{
    Error, FlatHashMap, FlatHashSet, Mapper, MappedStrValueMap, MmapMapper, OccupancyTracker, Snapshot, StrValueMap,
};
use test_log::test;

/// Refuses to map anything.
struct FailingMapper;

impl Mapper for FailingMapper {
    fn map(&self, _file: &File) -> io::Result<Mmap> {
        Err(io::Error::new(io::ErrorKind::OutOfMemory, "injected mapping failure"))
    }
}

/// Delegates to the real mapper and counts calls.
#[derive(Default)]
struct CountingMapper {
    calls: Cell<usize>,
}

impl Mapper for CountingMapper {
    fn map(&self, file: &File) -> io::Result<Mmap> {
        self.calls.set(self.calls.get() + 1);
        MmapMapper.map(file)
    }
}

/// Descriptors of this process currently open on `path`.
#[cfg(target_os = "linux")]
fn open_descriptors(path: &Path) -> usize {
    let target = path.canonicalize().unwrap();
    std::fs::read_dir("/proc/self/fd")
        .unwrap()
        .filter_map(|entry| std::fs::read_link(entry.ok()?.path()).ok())
        .filter(|link| *link == target)
        .count()
}

#[test]
fn failed_mapping_reports_error_and_releases_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("set.tbl");
    let mut set: FlatHashSet<u64> = FlatHashSet::new();
    set.try_extend(0..100).unwrap();
    set.write(&path).unwrap();

    let err = FlatHashSet::<u64>::open_with(&path, &FailingMapper).unwrap_err();
    match &err {
        Error::Mapping { path: p, source } => {
            assert_eq!(p, &path);
            assert_eq!(source.kind(), io::ErrorKind::OutOfMemory);
        }
        other => panic!("expected a mapping failure, got {other:?}"),
    }
    assert!(err.to_string().contains("injected mapping failure"));

    #[cfg(target_os = "linux")]
    assert_eq!(open_descriptors(&path), 0, "descriptor leaked after failed open");

    // The same file still opens with the real mapper.
    let mapped = FlatHashSet::<u64>::open(&path).unwrap();
    assert_eq!(mapped.len(), 100);
}

#[test]
fn mapped_table_holds_no_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.tbl");
    let mut m: FlatHashMap<u32, u32> = FlatHashMap::new();
    m.try_extend((0..1000).map(|k| (k, k + 1))).unwrap();
    m.write(&path).unwrap();

    let mapper = CountingMapper::default();
    let mapped = FlatHashMap::<u32, u32>::open_with(&path, &mapper).unwrap();
    assert_eq!(mapper.calls.get(), 1);
    #[cfg(target_os = "linux")]
    assert_eq!(open_descriptors(&path), 0);

    // The mapping outlives the descriptor.
    assert_eq!(mapped.get(&999), Some(&1000));
}

#[test]
fn mapped_tables_are_shared_across_threads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.tbl");
    let mut m: FlatHashMap<u64, u64> = FlatHashMap::new();
    for k in 0..5000 {
        m.insert(k, k * 3).unwrap();
    }
    m.write(&path).unwrap();
    let mapped = FlatHashMap::<u64, u64>::open(&path).unwrap();

    std::thread::scope(|s| {
        for t in 0..4u64 {
            let mapped = &mapped;
            s.spawn(move || {
                for k in (t..5000).step_by(4) {
                    assert_eq!(mapped.get(&k), Some(&(k * 3)));
                }
            });
        }
    });
}

#[test]
fn cloned_mapped_table_keeps_mapping_alive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clone.tbl");
    let mut m: StrValueMap<u32> = StrValueMap::new();
    m.insert(1, "one".into()).unwrap();
    m.insert(2, "two".into()).unwrap();
    m.write(&path).unwrap();

    let copy = {
        let mapped: MappedStrValueMap<u32> = StrValueMap::<u32>::open(&path).unwrap();
        mapped.clone()
    };
    assert_eq!(copy.get(&2), Some("two"));
    assert!(copy.is_read_only());
}

#[test]
fn tracker_file_rejects_mapping_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bits.bin");
    OccupancyTracker::new(64).write(&path).unwrap();
    let err = OccupancyTracker::open_with(&path, &FailingMapper).unwrap_err();
    assert!(matches!(err, Error::Mapping { .. }));
}

#[test]
fn write_to_missing_directory_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("x.tbl");
    let err = FlatHashMap::<u8, u8>::new().write(&path).unwrap_err();
    assert!(matches!(err, Error::Io { .. }), "{err}");
}
