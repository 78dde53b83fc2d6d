use crate::codec::Endian;
use crate::error::{LhtError, Result};
use crate::header::{FileHeader, HeaderLayout};
use crate::tree::{HALO_RECORD_SIZE, HaloRecord};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Encodes forests of halo records into the LHaloTree layout.
///
/// The reader never needs this; it exists to produce fixtures, to convert
/// between byte orders, and to round-trip files.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeFileWriter {
    /// Byte order to write
    pub endian: Endian,

    /// Header layout to write
    pub layout: HeaderLayout,
}

impl TreeFileWriter {
    /// Creates a writer with the given byte order and header layout
    #[must_use]
    pub const fn new(endian: Endian, layout: HeaderLayout) -> Self {
        Self { endian, layout }
    }

    /// Encodes `trees` into a complete file image
    ///
    /// # Errors
    ///
    /// Returns an error if a tree holds more than `u32::MAX` halos or the
    /// header cannot represent the totals.
    pub fn encode<T: AsRef<[HaloRecord]>>(&self, trees: &[T]) -> Result<Vec<u8>> {
        let halos_per_tree = trees
            .iter()
            .map(|t| u32::try_from(t.as_ref().len()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| LhtError::format("tree", "more than u32::MAX halos in one tree"))?;

        let header = FileHeader::new(halos_per_tree, self.layout)?;

        let mut out = Vec::with_capacity(usize::try_from(header.expected_file_len()?).unwrap_or(0));
        header.encode(self.endian, &mut out)?;

        for tree in trees {
            for halo in tree.as_ref() {
                halo.encode(self.endian, &mut out);
            }
        }

        debug_assert_eq!(Some(out.len() as u64), header.expected_file_len().ok());
        debug_assert_eq!((out.len() - header.header_size()) % HALO_RECORD_SIZE, 0);
        Ok(out)
    }

    /// Writes `trees` to `path`, replacing any existing file
    ///
    /// The file is truncated and written only under an exclusive lock, so
    /// the write waits for open readers and a concurrent reader fails to
    /// open instead of seeing a partial file.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the file cannot be written.
    pub fn write<P: AsRef<Path>, T: AsRef<[HaloRecord]>>(&self, path: P, trees: &[T]) -> Result<()> {
        let bytes = self.encode(trees)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(LhtError::io("creating LHaloTree file"))?;

        // Truncate only once readers holding the shared lock are gone
        FileExt::lock_exclusive(&file).map_err(LhtError::io("locking LHaloTree file"))?;
        file.set_len(0).map_err(LhtError::io("truncating LHaloTree file"))?;

        file.write_all(&bytes).map_err(LhtError::io("writing LHaloTree file"))?;
        file.sync_all().map_err(LhtError::io("syncing LHaloTree file"))?;

        FileExt::unlock(&file).map_err(LhtError::io("unlocking LHaloTree file"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::MAX_TREES;
    use std::thread;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_encode_layout() {
        let trees = vec![vec![HaloRecord::at_snapshot(1); 2], vec![], vec![HaloRecord::at_snapshot(0)]];
        let bytes = TreeFileWriter::default().encode(&trees).unwrap();

        assert_eq!(bytes.len(), 16 + 3 * HALO_RECORD_SIZE);

        let header = FileHeader::decode(&bytes, Endian::Little, HeaderLayout::Bare, MAX_TREES).unwrap();
        assert_eq!(header.halos_per_tree, vec![2, 0, 1]);
    }

    #[test]
    fn test_counted_big_endian() {
        let writer = TreeFileWriter::new(Endian::Big, HeaderLayout::Counted);
        let bytes = writer.encode(&[vec![HaloRecord::at_snapshot(2); 3]]).unwrap();

        assert_eq!(bytes[..4], 1u32.to_be_bytes());
        assert_eq!(bytes[4..8], 3u32.to_be_bytes());
        assert_eq!(bytes[8..12], 3u32.to_be_bytes());
        assert_eq!(bytes.len(), 12 + 3 * HALO_RECORD_SIZE);
    }

    #[test]
    fn test_write_replaces_longer_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let writer = TreeFileWriter::default();

        writer.write(temp_file.path(), &[vec![HaloRecord::at_snapshot(3); 5]]).unwrap();
        writer.write(temp_file.path(), &[vec![HaloRecord::at_snapshot(3)]]).unwrap();

        let bytes = std::fs::read(temp_file.path()).unwrap();
        assert_eq!(bytes, writer.encode(&[vec![HaloRecord::at_snapshot(3)]]).unwrap());
    }

    #[test]
    fn test_write_waits_for_shared_lock() {
        let temp_file = NamedTempFile::new().unwrap();
        let writer = TreeFileWriter::default();
        writer.write(temp_file.path(), &[vec![HaloRecord::at_snapshot(1); 4]]).unwrap();
        let before = std::fs::read(temp_file.path()).unwrap();

        let reader = std::fs::File::open(temp_file.path()).unwrap();
        FileExt::lock_shared(&reader).unwrap();

        thread::scope(|s| {
            let pending = s.spawn(|| writer.write(temp_file.path(), &[vec![HaloRecord::at_snapshot(2)]]));

            // The blocked writer must not have touched the file yet
            thread::sleep(Duration::from_millis(50));
            assert_eq!(std::fs::read(temp_file.path()).unwrap(), before);

            FileExt::unlock(&reader).unwrap();
            pending.join().unwrap().unwrap();
        });

        assert_eq!(std::fs::metadata(temp_file.path()).unwrap().len(), 8 + HALO_RECORD_SIZE as u64);
    }
}
