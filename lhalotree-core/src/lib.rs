//! lhalotree-core - Reader for LHaloTree merger-tree files
//!
//! LHaloTree files hold the forests of dark-matter halo merger trees written
//! by halo-finder pipelines of cosmological simulations. Each tree is a flat
//! array of fixed-width halo records whose integer fields link halos to their
//! descendant, their progenitors, and the other members of their
//! friends-of-friends (FOF) group.
//!
//! # Features
//!
//! - Memory-mapped, read-only access to multi-gigabyte files
//! - Eager (decode everything at open) or lazy (decode each tree on first use)
//! - Every tree is validated before it is handed out: reference ranges,
//!   forward-in-time descendants, cycle freedom, linked-list consistency
//! - Bounded, iterator-based traversal of progenitors, descendants and groups
//!
//! # Example
//!
//! ```no_run
//! use lhalotree_core::{LHaloTreeFile, ReaderOptions, navigate};
//!
//! # fn main() -> Result<(), lhalotree_core::LhtError> {
//! let file = LHaloTreeFile::open("trees_063.0", ReaderOptions::default())?;
//!
//! for index in 0..file.tree_count() {
//!     let tree = file.get_tree(index)?;
//!     for root in tree.roots() {
//!         let progenitors = navigate::progenitors(&tree, root)?.collect::<Result<Vec<_>, _>>()?;
//!         println!("tree {index} root {root}: {} progenitors", progenitors.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Design Philosophy
//!
//! The crate decodes and validates; it does not interpret. Path discovery
//! for multi-file simulation outputs, unit conversion, and any physics on
//! the trees are left to the application layer.

pub mod codec;
pub mod error;
mod header;
mod writer;

#[cfg(feature = "internals")]
pub mod storage;
#[cfg(not(feature = "internals"))]
pub(crate) mod storage;

pub mod tree;

pub use codec::Endian;
pub use error::{CorruptKind, ErrorKind, LhtError, Result};
pub use header::{FileHeader, HeaderLayout, MAX_TREES};
pub use tree::navigate;
pub use tree::navigate::{
    breadth_first, depth_first, descendant_chain, fof_group_members, is_leaf, is_root, main_branch,
    progenitors,
};
pub use tree::{HALO_RECORD_SIZE, HaloField, HaloIndex, HaloRecord, NONE, Tree, TreeBuilder, Validation};
pub use writer::TreeFileWriter;

use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use storage::Storage;
use tracing::{debug, warn};

/// When trees are decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Decode and validate every tree during `open`
    Eager,

    /// Decode and validate each tree on its first `get_tree`
    #[default]
    Lazy,
}

/// Configuration options for `LHaloTreeFile`
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Eager or lazy tree decoding
    pub mode: LoadMode,

    /// Byte order the file was written in
    pub endian: Endian,

    /// Fields preceding the per-tree halo counts
    pub layout: HeaderLayout,

    /// How corrupt trees are handled
    pub validation: Validation,

    /// Largest tree count accepted from the header
    pub max_trees: u32,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            mode: LoadMode::Lazy,
            endian: Endian::Little,
            layout: HeaderLayout::Bare,
            validation: Validation::Strict,
            max_trees: MAX_TREES,
        }
    }
}

/// A tree skipped by a permissive eager open
#[derive(Debug, Clone)]
pub struct TreeDiagnostic {
    /// Index of the skipped tree
    pub tree: u32,

    /// Why it was skipped
    pub error: LhtError,
}

/// Outcome of decoding one tree, shared by every caller that asks for it
type Slot = OnceLock<Result<Arc<Tree>>>;

/// Public facade for an open LHaloTree file
///
/// The header and the byte offset of every tree are read once at open.
/// Trees are decoded into per-index slots, each initialised at most once, so
/// concurrent `get_tree` calls for the same index share a single build.
#[derive(Debug)]
pub struct LHaloTreeFile {
    /// Byte source; `None` once closed
    storage: Option<Storage>,

    header: FileHeader,

    /// `offsets[i]..offsets[i + 1]` is the byte range of tree `i`
    offsets: Vec<u64>,

    slots: Vec<Slot>,

    diagnostics: Vec<TreeDiagnostic>,

    options: ReaderOptions,

    /// Number of decode-and-validate passes performed
    builds: AtomicUsize,
}

impl LHaloTreeFile {
    /// Open an LHaloTree file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the file
    /// * `options` - Reader configuration
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be opened, locked or mapped
    /// - The header is truncated or implausible
    /// - The file length disagrees with the header
    /// - In eager strict mode, any tree fails to decode or validate
    pub fn open<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), mode = ?options.mode, "opening LHaloTree file");
        Self::with_storage(Storage::open(path)?, options)
    }

    /// Read an LHaloTree file image already held in memory
    ///
    /// # Errors
    ///
    /// Same as [`LHaloTreeFile::open`], minus the file-system failures.
    pub fn from_bytes(bytes: Vec<u8>, options: ReaderOptions) -> Result<Self> {
        Self::with_storage(Storage::from_bytes(bytes), options)
    }

    fn with_storage(storage: Storage, options: ReaderOptions) -> Result<Self> {
        let header = FileHeader::decode(storage.bytes(), options.endian, options.layout, options.max_trees)?;

        let expected = header.expected_file_len()?;
        if storage.len() < expected {
            return Err(LhtError::Truncated { what: "halo records", needed: expected, available: storage.len() });
        }
        if storage.len() > expected {
            return Err(LhtError::format(
                "file",
                format!("{} trailing bytes after the last halo record", storage.len() - expected),
            ));
        }

        let offsets = header.tree_offsets()?;
        let slots: Vec<Slot> = (0..header.tree_count).map(|_| OnceLock::new()).collect();

        debug!(
            trees = header.tree_count,
            halos = header.total_halos(),
            mapped = storage.is_mapped(),
            "LHaloTree header decoded"
        );

        let mut file = Self {
            storage: Some(storage),
            header,
            offsets,
            slots,
            diagnostics: Vec::new(),
            options,
            builds: AtomicUsize::new(0),
        };

        if file.options.mode == LoadMode::Eager {
            file.load_all()?;
        }

        Ok(file)
    }

    /// Decodes every tree up front, honouring the validation policy
    fn load_all(&mut self) -> Result<()> {
        for index in 0..self.header.tree_count {
            let outcome = self.decode_tree(index);

            if let Err(error) = &outcome {
                let skippable = self.options.validation == Validation::Permissive
                    && error.kind() == ErrorKind::CorruptTree;
                if !skippable {
                    return Err(error.clone());
                }
                warn!(tree = index, %error, "skipping corrupt tree");
                self.diagnostics.push(TreeDiagnostic { tree: index, error: error.clone() });
            }

            // Slots are fresh, so the set cannot fail
            let _ = self.slots[index as usize].set(outcome);
        }
        Ok(())
    }

    /// Reads, decodes and validates one tree
    fn decode_tree(&self, index: u32) -> Result<Arc<Tree>> {
        let storage = self.storage()?;
        let range = self.tree_byte_range(index)?;
        let bytes = storage.zone(range.start, range.end - range.start)?;

        let halos = bytes
            .chunks_exact(HALO_RECORD_SIZE)
            .map(|window| HaloRecord::decode(window, self.options.endian))
            .collect::<Result<Vec<_>>>()?;

        self.builds.fetch_add(1, Ordering::Relaxed);

        let declared = self.header.halos_per_tree[index as usize];
        let tree = TreeBuilder::new(index).validation(self.options.validation).build(halos, declared)?;

        debug!(tree = index, halos = tree.len(), "tree built");
        Ok(Arc::new(tree))
    }

    /// Get a tree by index, decoding it on first access in lazy mode
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The handle is closed
    /// - `index >= tree_count()`
    /// - The tree fails to decode or validate (every caller sees the same error)
    pub fn get_tree(&self, index: u32) -> Result<Arc<Tree>> {
        if self.storage.is_none() {
            return Err(LhtError::Closed);
        }
        let slot = self.slots.get(index as usize).ok_or(LhtError::IndexOutOfRange {
            what: "tree",
            index: u64::from(index),
            len: u64::from(self.header.tree_count),
        })?;

        slot.get_or_init(|| self.decode_tree(index)).clone()
    }

    /// Decode a single halo straight from the file without building its tree
    ///
    /// The record is not validated; use [`LHaloTreeFile::get_tree`] when the
    /// references will be followed.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is closed or either index is out of range.
    pub fn read_halo(&self, tree: u32, halo: u32) -> Result<HaloRecord> {
        let storage = self.storage()?;
        let range = self.tree_byte_range(tree)?;

        let count = self.header.halos_per_tree[tree as usize];
        if halo >= count {
            return Err(LhtError::IndexOutOfRange {
                what: "halo",
                index: u64::from(halo),
                len: u64::from(count),
            });
        }

        let offset = range.start + u64::from(halo) * HALO_RECORD_SIZE as u64;
        let window = storage.zone(offset, HALO_RECORD_SIZE as u64)?;
        HaloRecord::decode(window, self.options.endian)
    }

    /// Release the byte source and every cached tree
    ///
    /// Trees already handed out stay valid. Later `get_tree` and `read_halo`
    /// calls fail with [`LhtError::Closed`].
    pub fn close(&mut self) {
        if self.storage.take().is_some() {
            self.slots.iter_mut().for_each(|slot| *slot = OnceLock::new());
            debug!(trees = self.header.tree_count, "LHaloTree file closed");
        }
    }

    /// Returns true once `close` has been called
    pub fn is_closed(&self) -> bool {
        self.storage.is_none()
    }

    /// Get the number of trees in the file
    pub fn tree_count(&self) -> u32 {
        self.header.tree_count
    }

    /// Get the total number of halos across all trees
    pub fn total_halos(&self) -> u64 {
        self.header.total_halos()
    }

    /// Get the halo count of one tree
    ///
    /// # Errors
    ///
    /// Returns an error if `index >= tree_count()`.
    pub fn halos_in_tree(&self, index: u32) -> Result<u32> {
        self.header.halos_per_tree.get(index as usize).copied().ok_or(LhtError::IndexOutOfRange {
            what: "tree",
            index: u64::from(index),
            len: u64::from(self.header.tree_count),
        })
    }

    /// Get the byte range occupied by one tree's records
    ///
    /// # Errors
    ///
    /// Returns an error if `index >= tree_count()`.
    pub fn tree_byte_range(&self, index: u32) -> Result<Range<u64>> {
        self.halos_in_tree(index)?;
        let i = index as usize;
        Ok(self.offsets[i]..self.offsets[i + 1])
    }

    /// Get the decoded file header
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Get the options this file was opened with
    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Trees skipped by a permissive eager open
    pub fn diagnostics(&self) -> &[TreeDiagnostic] {
        &self.diagnostics
    }

    /// Number of decode-and-validate passes performed so far
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    fn storage(&self) -> Result<&Storage> {
        self.storage.as_ref().ok_or(LhtError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn scenario_tree() -> Vec<HaloRecord> {
        vec![
            HaloRecord::at_snapshot(5).with_progenitors(1, NONE),
            HaloRecord::at_snapshot(4).with_descendant(0).with_progenitors(NONE, 2),
            HaloRecord::at_snapshot(4).with_descendant(0),
        ]
    }

    #[test]
    fn test_open_lazy_from_disk() {
        let temp_file = NamedTempFile::new().unwrap();
        TreeFileWriter::default().write(temp_file.path(), &[scenario_tree(), scenario_tree()]).unwrap();

        let file = LHaloTreeFile::open(temp_file.path(), ReaderOptions::default()).unwrap();
        assert_eq!(file.tree_count(), 2);
        assert_eq!(file.total_halos(), 6);
        assert_eq!(file.build_count(), 0);

        let tree = file.get_tree(1).unwrap();
        assert_eq!(tree.index(), 1);
        assert_eq!(tree.len(), 3);
        assert_eq!(file.build_count(), 1);

        // Memoized
        let again = file.get_tree(1).unwrap();
        assert!(Arc::ptr_eq(&tree, &again));
        assert_eq!(file.build_count(), 1);
    }

    #[test]
    fn test_eager_builds_everything() {
        let bytes = TreeFileWriter::default().encode(&[scenario_tree(), scenario_tree()]).unwrap();
        let options = ReaderOptions { mode: LoadMode::Eager, ..ReaderOptions::default() };
        let file = LHaloTreeFile::from_bytes(bytes, options).unwrap();

        assert_eq!(file.build_count(), 2);
        file.get_tree(0).unwrap();
        assert_eq!(file.build_count(), 2);
        assert!(file.diagnostics().is_empty());
    }

    #[test]
    fn test_read_halo_without_building() {
        let bytes = TreeFileWriter::default().encode(&[scenario_tree()]).unwrap();
        let file = LHaloTreeFile::from_bytes(bytes, ReaderOptions::default()).unwrap();

        let halo = file.read_halo(0, 2).unwrap();
        assert_eq!(halo.descendant, 0);
        assert_eq!(halo.snap_num, 4);
        assert_eq!(file.build_count(), 0);

        assert!(matches!(file.read_halo(0, 3).unwrap_err(), LhtError::IndexOutOfRange { what: "halo", .. }));
        assert!(matches!(file.read_halo(1, 0).unwrap_err(), LhtError::IndexOutOfRange { what: "tree", .. }));
    }

    #[test]
    fn test_close_releases_trees() {
        let bytes = TreeFileWriter::default().encode(&[scenario_tree()]).unwrap();
        let mut file = LHaloTreeFile::from_bytes(bytes, ReaderOptions::default()).unwrap();

        let tree = file.get_tree(0).unwrap();
        file.close();

        assert!(file.is_closed());
        assert_eq!(file.tree_count(), 1);
        assert!(matches!(file.get_tree(0).unwrap_err(), LhtError::Closed));
        assert!(matches!(file.read_halo(0, 0).unwrap_err(), LhtError::Closed));

        // Handed-out trees outlive the handle's cache
        assert_eq!(Arc::strong_count(&tree), 1);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = TreeFileWriter::default().encode(&[scenario_tree()]).unwrap();
        bytes.push(0);
        let err = LHaloTreeFile::from_bytes(bytes, ReaderOptions::default()).unwrap_err();
        assert!(err.to_string().contains("trailing bytes"));
    }
}
