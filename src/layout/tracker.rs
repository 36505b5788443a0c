//! Standalone occupancy files: `u64` bit count followed by the packed words.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use log::debug;

use super::cursor::ByteWriter;
use super::{map_file, Mapper, MmapMapper};
use crate::error::{Error, Result};
use crate::occupancy::OccupancyTracker;

impl OccupancyTracker {
    /// Write the tracker alone to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let write = || {
            let mut w = ByteWriter::new(BufWriter::new(File::create(path)?));
            self.write_to(&mut w)?;
            w.into_inner().map(drop)
        };
        write().map_err(|e| Error::io(path, e))?;
        debug!("wrote occupancy file {} ({} slots)", path.display(), self.len());
        Ok(())
    }

    /// Map a tracker written by [`write`](Self::write). The result is read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &MmapMapper)
    }

    /// [`open`](Self::open) with a caller-supplied mapper.
    pub fn open_with<M: Mapper + ?Sized>(path: impl AsRef<Path>, mapper: &M) -> Result<Self> {
        let path = path.as_ref();
        let map = map_file(path, mapper, 8)?;
        let size = map.len();
        let tracker = Self::from_mapped(map, 0).map_err(|reason| Error::corrupt(path, reason))?;
        if tracker.encoded_len() != size {
            return Err(Error::corrupt(
                path,
                format!("{} trailing bytes after occupancy words", size - tracker.encoded_len()),
            ));
        }
        Ok(tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::SlotState;
    use std::fs;

    #[test]
    fn test_tracker_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("occupancy.bin");
        let mut t = OccupancyTracker::new(37);
        t.set_occupied(0).unwrap();
        t.set_occupied(20).unwrap();
        t.set_occupied(36).unwrap();
        t.set_erased(20).unwrap();
        t.write(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), t.encoded_len() as u64);

        let mut mapped = OccupancyTracker::open(&path).unwrap();
        assert!(mapped.is_mapped());
        assert_eq!(mapped.len(), 37);
        assert_eq!(mapped.state(0), SlotState::Occupied);
        assert_eq!(mapped.state(20), SlotState::Erased);
        assert_eq!(mapped.state(21), SlotState::Empty);
        assert_eq!(mapped.occupied_count(), 2);
        assert!(mapped.set_occupied(1).unwrap_err().is_read_only());
        assert!(mapped.resize(100).unwrap_err().is_read_only());
    }

    #[test]
    fn test_trailing_bytes_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("occupancy.bin");
        OccupancyTracker::new(16).write(&path).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0; 4]);
        fs::write(&path, bytes).unwrap();
        let err = OccupancyTracker::open(&path).unwrap_err();
        assert!(err.to_string().contains("trailing"), "{err}");
    }
}
