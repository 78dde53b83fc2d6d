use crate::error::{LhtError, Result};
use fs2::FileExt;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Bytes behind a [`Storage`]
#[derive(Debug)]
enum Backing {
    /// Read-only mapping of a file on disk
    Mapped(Mmap),

    /// Owned in-memory copy
    Buffer(Vec<u8>),
}

/// Read-only byte source for an LHaloTree file
#[derive(Debug)]
pub struct Storage {
    /// File handle (owns the shared lock), absent for in-memory buffers
    file: Option<File>,

    backing: Backing,
}

impl Storage {
    /// Maps an LHaloTree file read-only
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be opened
    /// - Another process holds an exclusive lock (a writer is active)
    /// - The file cannot be memory-mapped
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path).map_err(LhtError::io("opening LHaloTree file"))?;

        // Readers share the file; a writer holding the exclusive lock keeps us out
        FileExt::try_lock_shared(&file)
            .map_err(LhtError::io("locking LHaloTree file (is a writer active?)"))?;

        let len = file.metadata().map_err(LhtError::io("reading file metadata"))?.len();

        // Zero-length mappings are rejected on some platforms
        let backing = if len == 0 {
            Backing::Buffer(Vec::new())
        } else {
            // SAFETY:
            // - The mapping is read-only and never handed out mutably
            // - The shared lock keeps cooperating writers from truncating the file
            let mmap = unsafe { Mmap::map(&file) }.map_err(LhtError::io("mapping LHaloTree file"))?;
            Backing::Mapped(mmap)
        };

        Ok(Self { file: Some(file), backing })
    }

    /// Wraps an in-memory copy of a file
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { file: None, backing: Backing::Buffer(bytes) }
    }

    /// Returns the whole byte source
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(mmap) => &mmap[..],
            Backing::Buffer(buf) => buf.as_slice(),
        }
    }

    /// Total length in bytes
    #[must_use]
    pub fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    /// Returns true if the source holds no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Returns true if the bytes come from a memory-mapped file
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    /// Get an immutable slice of the source
    ///
    /// # Arguments
    ///
    /// * `offset` - Byte offset from the start of the file
    /// * `len` - Number of bytes to return
    ///
    /// # Returns
    ///
    /// Returns a slice borrowed from the mapping (zero-copy)
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds
    pub fn zone(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let bytes = self.bytes();
        let available = bytes.len() as u64;

        let end = offset.checked_add(len).filter(|&end| end <= available).ok_or(
            LhtError::Truncated {
                what: "tree zone",
                needed: offset.saturating_add(len),
                available,
            },
        )?;

        // Both bounds fit in usize because they are <= bytes.len()
        Ok(&bytes[offset as usize..end as usize])
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            // Explicitly unlock the file (happens automatically, but being explicit)
            let _ = FileExt::unlock(file);
        }
    }
}
