//! Error types for LHaloTree decoding and traversal.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::tree::HaloField;

/// Errors that can occur while opening, decoding, or walking an LHaloTree file.
///
/// The type is `Clone` so that a memoized build failure can be handed to every
/// caller that asks for the same tree.
#[derive(Error, Debug, Clone)]
pub enum LhtError {
    /// The byte source ended before a structure was fully read.
    #[error("Truncated {what}: needed {needed} bytes, {available} available")]
    Truncated {
        /// Structure being decoded
        what: &'static str,
        /// Bytes required
        needed: u64,
        /// Bytes actually present
        available: u64,
    },

    /// The bytes could be read but do not describe a plausible file.
    #[error("Malformed {what}: {reason}")]
    Format {
        /// Structure being decoded
        what: &'static str,
        /// Human-readable diagnostic
        reason: String,
    },

    /// A tree decoded cleanly but violates a structural invariant.
    #[error("Corrupt tree {tree}: halo {halo} field {field}: {kind}")]
    CorruptTree {
        /// Tree index within the file
        tree: u32,
        /// Tree-local halo index where the violation was found
        halo: u32,
        /// Reference field involved
        field: HaloField,
        /// Which invariant failed
        kind: CorruptKind,
    },

    /// A tree or halo index outside the valid range was requested.
    #[error("{what} index {index} out of range (count is {len})")]
    IndexOutOfRange {
        /// "tree" or "halo"
        what: &'static str,
        /// Requested index
        index: u64,
        /// Number of valid entries
        len: u64,
    },

    /// A walk exceeded its step bound or followed a link out of the tree.
    #[error("Traversal from halo {start} along {field} aborted after {steps} steps")]
    Traversal {
        /// Halo the walk started from
        start: u32,
        /// Link field being followed
        field: HaloField,
        /// Steps taken before aborting
        steps: usize,
    },

    /// The file handle was closed.
    #[error("LHaloTree file handle is closed")]
    Closed,

    /// An I/O error occurred while opening or mapping the file.
    #[error("IO error while {action}: {source}")]
    Io {
        /// What was being attempted
        action: &'static str,
        /// Underlying error
        #[source]
        source: Arc<io::Error>,
    },
}

/// The invariant a corrupt tree violated.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptKind {
    /// A reference is neither the sentinel nor inside `[0, halo_count)`.
    #[error("reference {value} outside [0, {len})")]
    OutOfRange {
        /// Raw stored value
        value: i32,
        /// Halo count of the tree
        len: u32,
    },

    /// A descendant lives at an earlier snapshot than its progenitor.
    #[error("descendant at snapshot {descendant_snap} precedes snapshot {snap}")]
    BackwardInTime {
        /// Snapshot of the halo
        snap: i32,
        /// Snapshot of its descendant
        descendant_snap: i32,
    },

    /// Following descendants revisits a halo.
    #[error("descendant chain contains a cycle")]
    DescendantCycle,

    /// The progenitor linked list disagrees with the descendant links.
    #[error("progenitor list inconsistent with descendant links")]
    ProgenitorList,

    /// The FOF linked list is not a well-formed group.
    #[error("FOF group list is malformed")]
    FofGroup,
}

/// Coarse classification of [`LhtError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Header or record could not be decoded
    Format,
    /// Structural invariant violated
    CorruptTree,
    /// Index out of range
    Index,
    /// Walk bound exceeded
    Traversal,
    /// Operation on a closed handle
    Closed,
    /// Operating system error
    Io,
}

impl LhtError {
    /// Returns the coarse kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Truncated { .. } | Self::Format { .. } => ErrorKind::Format,
            Self::CorruptTree { .. } => ErrorKind::CorruptTree,
            Self::IndexOutOfRange { .. } => ErrorKind::Index,
            Self::Traversal { .. } => ErrorKind::Traversal,
            Self::Closed => ErrorKind::Closed,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Adapter for `map_err` on I/O results.
    pub(crate) fn io(action: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { action, source: Arc::new(source) }
    }

    pub(crate) fn format(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Format { what, reason: reason.into() }
    }
}

/// Result type for LHaloTree operations.
pub type Result<T> = std::result::Result<T, LhtError>;
