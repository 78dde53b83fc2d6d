mod builder;
mod halo;
pub mod navigate;

pub use builder::{TreeBuilder, Validation};
pub use halo::{HALO_RECORD_SIZE, HaloField, HaloRecord, NONE};

use crate::error::{LhtError, Result};

/// Halo index within a tree
pub type HaloIndex = u32;

/// Compressed adjacency list: `targets[offsets[i]..offsets[i + 1]]` are the
/// neighbours of halo `i`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Adjacency {
    offsets: Vec<u32>,
    targets: Vec<HaloIndex>,
}

impl Adjacency {
    /// Groups halos `0..n` under `key(h)`, preserving index order within each
    /// group. Keys must already be range-checked.
    pub(crate) fn invert(n: usize, key: impl Fn(usize) -> Option<HaloIndex>) -> Self {
        let mut offsets = vec![0u32; n + 1];
        for h in 0..n {
            if let Some(k) = key(h) {
                offsets[k as usize + 1] += 1;
            }
        }
        for i in 0..n {
            offsets[i + 1] += offsets[i];
        }

        let mut cursor = offsets.clone();
        let mut targets = vec![0; offsets[n] as usize];
        for h in 0..n {
            if let Some(k) = key(h) {
                let slot = &mut cursor[k as usize];
                targets[*slot as usize] = h as HaloIndex;
                *slot += 1;
            }
        }

        Self { offsets, targets }
    }

    #[inline]
    pub(crate) fn get(&self, halo: usize) -> &[HaloIndex] {
        let start = self.offsets[halo] as usize;
        let end = self.offsets[halo + 1] as usize;
        &self.targets[start..end]
    }

    #[inline]
    pub(crate) fn degree(&self, halo: usize) -> usize {
        (self.offsets[halo + 1] - self.offsets[halo]) as usize
    }
}

/// A decoded merger tree.
///
/// Halos live in a flat arena addressed by their tree-local index; the
/// progenitor and FOF relations are kept both as the stored linked lists and
/// as inverted adjacency built once by [`TreeBuilder`]. A `Tree` is immutable
/// and shared behind an `Arc`.
#[derive(Debug)]
pub struct Tree {
    index: u32,
    halos: Vec<HaloRecord>,

    /// Halos whose descendant is `h`
    children: Adjacency,

    /// Members of the group whose canonical first halo is `h`
    groups: Adjacency,

    validated: bool,
}

impl Tree {
    /// Index of this tree within its file
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Number of halos
    #[must_use]
    pub fn len(&self) -> usize {
        self.halos.len()
    }

    /// Returns true if the tree holds no halos
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.halos.is_empty()
    }

    /// Returns true if every structural invariant was checked at build time
    #[must_use]
    pub const fn is_validated(&self) -> bool {
        self.validated
    }

    /// All halos in index order
    #[must_use]
    pub fn halos(&self) -> &[HaloRecord] {
        &self.halos
    }

    /// Returns the halo at `halo`.
    ///
    /// # Errors
    ///
    /// Returns [`LhtError::IndexOutOfRange`] if `halo >= len()`.
    pub fn halo(&self, halo: HaloIndex) -> Result<&HaloRecord> {
        self.halos.get(halo as usize).ok_or(LhtError::IndexOutOfRange {
            what: "halo",
            index: u64::from(halo),
            len: self.halos.len() as u64,
        })
    }

    /// Halos whose descendant is `halo`, in index order.
    ///
    /// # Errors
    ///
    /// Returns [`LhtError::IndexOutOfRange`] if `halo >= len()`.
    pub fn children(&self, halo: HaloIndex) -> Result<&[HaloIndex]> {
        self.halo(halo)?;
        Ok(self.children.get(halo as usize))
    }

    /// Members of `halo`'s FOF group, in index order.
    ///
    /// A halo without a first-in-group reference is a group of its own.
    ///
    /// # Errors
    ///
    /// Returns [`LhtError::IndexOutOfRange`] if `halo >= len()`.
    pub fn fof_group(&self, halo: HaloIndex) -> Result<&[HaloIndex]> {
        let head = self.group_head(halo)?;
        Ok(self.groups.get(head as usize))
    }

    /// Canonical first halo of `halo`'s FOF group.
    ///
    /// # Errors
    ///
    /// Returns [`LhtError::IndexOutOfRange`] if `halo >= len()`.
    pub fn group_head(&self, halo: HaloIndex) -> Result<HaloIndex> {
        Ok(self.halo(halo)?.link(HaloField::FirstHaloInFofGroup).unwrap_or(halo))
    }

    /// Halos without a descendant (the final halo of each branch)
    pub fn roots(&self) -> impl Iterator<Item = HaloIndex> + '_ {
        self.halos
            .iter()
            .enumerate()
            .filter(|(_, h)| h.link(HaloField::Descendant).is_none())
            .map(|(i, _)| i as HaloIndex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacency_invert() {
        // 0 <- 1, 0 <- 3, 2 <- 4
        let keys = [None, Some(0), None, Some(0), Some(2)];
        let adj = Adjacency::invert(keys.len(), |h| keys[h]);

        assert_eq!(adj.get(0), &[1, 3]);
        assert_eq!(adj.get(1), &[] as &[u32]);
        assert_eq!(adj.get(2), &[4]);
        assert_eq!(adj.degree(0), 2);
        assert_eq!(adj.degree(4), 0);
    }

    #[test]
    fn test_adjacency_empty() {
        let adj = Adjacency::invert(0, |_| None);
        assert!(adj.targets.is_empty());
        assert_eq!(adj.offsets, vec![0]);
    }
}
