//! Tree index builder: validates the stored references of one tree and
//! inverts them into adjacency.
//!
//! # Checks
//!
//! 1. Range: every reference is `NONE` or inside `[0, n)`
//! 2. Forward time: a descendant never sits at an earlier snapshot
//! 3. Cycles: descendant chains end at a root
//! 4. Lists: the progenitor and FOF linked lists agree with the descendant
//!    and first-in-group fields
//!
//! Every check visits each halo a constant number of times, so building is
//! O(n) in the halo count.

use super::{Adjacency, HaloField, HaloIndex, HaloRecord, Tree};
use crate::error::{CorruptKind, LhtError, Result};

/// How much of the structure is verified before a tree is handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Validation {
    /// Verify everything; the first corrupt tree fails the whole eager open
    #[default]
    Strict,

    /// Verify everything; corrupt trees are skipped and reported
    Permissive,

    /// Only range-check references. Walks over such a tree stay bounded but
    /// may stop with a traversal error.
    Skip,
}

impl Validation {
    const fn checks_structure(self) -> bool {
        !matches!(self, Self::Skip)
    }
}

/// Marks used by the descendant cycle search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Builder for a single [`Tree`]
#[derive(Debug, Clone, Copy)]
pub struct TreeBuilder {
    tree: u32,
    validation: Validation,
}

impl TreeBuilder {
    /// Builder for the tree at `tree` within its file
    #[must_use]
    pub const fn new(tree: u32) -> Self {
        Self { tree, validation: Validation::Strict }
    }

    /// Sets the validation level
    #[must_use]
    pub const fn validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    /// Builds a tree from its decoded records
    ///
    /// # Arguments
    ///
    /// * `halos` - Records in file order
    /// * `declared` - Halo count announced by the file header
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `halos.len()` differs from `declared`
    /// - A reference points outside the tree
    /// - A descendant precedes its progenitor in time
    /// - The descendant links contain a cycle
    /// - The progenitor or FOF lists are inconsistent
    pub fn build(self, halos: Vec<HaloRecord>, declared: u32) -> Result<Tree> {
        if halos.len() != declared as usize {
            return Err(LhtError::format(
                "tree",
                format!(
                    "tree {} declares {declared} halos but {} records were supplied",
                    self.tree,
                    halos.len()
                ),
            ));
        }

        self.check_ranges(&halos, declared)?;

        let n = halos.len();
        let checked = self.validation.checks_structure();

        if checked {
            self.check_forward_time(&halos)?;
            self.check_descendant_cycles(&halos)?;
        }

        let children = Adjacency::invert(n, |h| halos[h].link(HaloField::Descendant));
        let groups = Adjacency::invert(n, |h| {
            Some(halos[h].link(HaloField::FirstHaloInFofGroup).unwrap_or(h as HaloIndex))
        });

        if checked {
            self.check_progenitor_lists(&halos, &children)?;
            self.check_fof_groups(&halos, &groups)?;
        }

        Ok(Tree { index: self.tree, halos, children, groups, validated: checked })
    }

    fn corrupt(&self, halo: usize, field: HaloField, kind: CorruptKind) -> LhtError {
        LhtError::CorruptTree { tree: self.tree, halo: halo as HaloIndex, field, kind }
    }

    fn check_ranges(&self, halos: &[HaloRecord], n: u32) -> Result<()> {
        for (h, halo) in halos.iter().enumerate() {
            for field in HaloField::ALL {
                let value = halo.raw_link(field);
                let in_range = u32::try_from(value).is_ok_and(|v| v < n);
                if value != super::NONE && !in_range {
                    return Err(self.corrupt(h, field, CorruptKind::OutOfRange { value, len: n }));
                }
            }
        }
        Ok(())
    }

    fn check_forward_time(&self, halos: &[HaloRecord]) -> Result<()> {
        for (h, halo) in halos.iter().enumerate() {
            if let Some(d) = halo.link(HaloField::Descendant) {
                let descendant_snap = halos[d as usize].snap_num;
                if descendant_snap < halo.snap_num {
                    return Err(self.corrupt(
                        h,
                        HaloField::Descendant,
                        CorruptKind::BackwardInTime { snap: halo.snap_num, descendant_snap },
                    ));
                }
            }
        }
        Ok(())
    }

    /// Three-colour walk over descendant links. Each halo enters the current
    /// path at most once, so the total work is bounded by `n` steps.
    fn check_descendant_cycles(&self, halos: &[HaloRecord]) -> Result<()> {
        let mut marks = vec![Mark::Unvisited; halos.len()];
        let mut path = Vec::new();

        for start in 0..halos.len() {
            let mut current = Some(start);

            while let Some(h) = current {
                match marks[h] {
                    Mark::Done => break,
                    Mark::OnPath => {
                        return Err(self.corrupt(h, HaloField::Descendant, CorruptKind::DescendantCycle));
                    }
                    Mark::Unvisited => {
                        marks[h] = Mark::OnPath;
                        path.push(h);
                        current = halos[h].link(HaloField::Descendant).map(|d| d as usize);
                    }
                }
            }

            for h in path.drain(..) {
                marks[h] = Mark::Done;
            }
        }
        Ok(())
    }

    /// Every halo's progenitor list must hold exactly the halos that name it
    /// as their descendant, each once.
    fn check_progenitor_lists(&self, halos: &[HaloRecord], children: &Adjacency) -> Result<()> {
        let mut listed = vec![false; halos.len()];

        for (h, halo) in halos.iter().enumerate() {
            let mut count = 0;
            let mut field = HaloField::FirstProgenitor;
            let mut current = halo.link(field);

            while let Some(p) = current {
                let p = p as usize;
                // Lists are disjoint, so a halo seen twice means a loop or a shared tail
                if listed[p] {
                    return Err(self.corrupt(p, field, CorruptKind::ProgenitorList));
                }
                listed[p] = true;

                if halos[p].link(HaloField::Descendant) != Some(h as HaloIndex) {
                    return Err(self.corrupt(p, HaloField::Descendant, CorruptKind::ProgenitorList));
                }

                count += 1;
                field = HaloField::NextProgenitor;
                current = halos[p].link(field);
            }

            if count != children.degree(h) {
                return Err(self.corrupt(h, HaloField::FirstProgenitor, CorruptKind::ProgenitorList));
            }
        }

        // A sibling link outside every list points from a halo with no descendant
        for (h, halo) in halos.iter().enumerate() {
            if !listed[h] && halo.link(HaloField::NextProgenitor).is_some() {
                return Err(self.corrupt(h, HaloField::NextProgenitor, CorruptKind::ProgenitorList));
            }
        }
        Ok(())
    }

    /// Each group is a list starting at its canonical halo (which names
    /// itself) and holding exactly the halos that name that head.
    fn check_fof_groups(&self, halos: &[HaloRecord], groups: &Adjacency) -> Result<()> {
        for (h, halo) in halos.iter().enumerate() {
            match halo.link(HaloField::FirstHaloInFofGroup) {
                Some(head) => {
                    let head_ref = halos[head as usize].link(HaloField::FirstHaloInFofGroup);
                    if head_ref != Some(head) {
                        return Err(self.corrupt(h, HaloField::FirstHaloInFofGroup, CorruptKind::FofGroup));
                    }
                }
                None => {
                    if halo.link(HaloField::NextHaloInFofGroup).is_some() {
                        return Err(self.corrupt(h, HaloField::NextHaloInFofGroup, CorruptKind::FofGroup));
                    }
                }
            }
        }

        let mut listed = vec![false; halos.len()];

        for (g, halo) in halos.iter().enumerate() {
            if halo.link(HaloField::FirstHaloInFofGroup) != Some(g as HaloIndex) {
                continue;
            }

            let mut count = 0;
            let mut current = Some(g as HaloIndex);

            while let Some(m) = current {
                let m = m as usize;
                if listed[m] {
                    return Err(self.corrupt(m, HaloField::NextHaloInFofGroup, CorruptKind::FofGroup));
                }
                listed[m] = true;

                if halos[m].link(HaloField::FirstHaloInFofGroup) != Some(g as HaloIndex) {
                    return Err(self.corrupt(m, HaloField::FirstHaloInFofGroup, CorruptKind::FofGroup));
                }

                count += 1;
                current = halos[m].link(HaloField::NextHaloInFofGroup);
            }

            if count != groups.degree(g) {
                return Err(self.corrupt(g, HaloField::NextHaloInFofGroup, CorruptKind::FofGroup));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NONE;

    fn build(halos: Vec<HaloRecord>) -> Result<Tree> {
        let n = halos.len() as u32;
        TreeBuilder::new(0).build(halos, n)
    }

    fn corrupt_kind(err: &LhtError) -> (u32, HaloField, CorruptKind) {
        match err {
            LhtError::CorruptTree { halo, field, kind, .. } => (*halo, *field, *kind),
            other => panic!("expected corrupt tree, got {other}"),
        }
    }

    /// Root 0 with progenitors 1 and 2; all three in one FOF group per snapshot
    fn merger() -> Vec<HaloRecord> {
        vec![
            HaloRecord::at_snapshot(5).with_progenitors(1, NONE).with_fof(0, NONE),
            HaloRecord::at_snapshot(4).with_descendant(0).with_progenitors(NONE, 2).with_fof(1, 2),
            HaloRecord::at_snapshot(4).with_descendant(0).with_fof(1, NONE),
        ]
    }

    #[test]
    fn test_build_valid_tree() {
        let tree = build(merger()).unwrap();
        assert_eq!(tree.len(), 3);
        assert!(tree.is_validated());
        assert_eq!(tree.children(0).unwrap(), &[1, 2]);
        assert_eq!(tree.fof_group(2).unwrap(), &[1, 2]);
        assert_eq!(tree.roots().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_declared_count_mismatch() {
        let err = TreeBuilder::new(0).build(merger(), 4).unwrap_err();
        assert!(matches!(err, LhtError::Format { .. }));
    }

    #[test]
    fn test_negative_reference_out_of_range() {
        let mut halos = merger();
        halos[2].next_progenitor = -2;
        let (halo, field, kind) = corrupt_kind(&build(halos).unwrap_err());
        assert_eq!((halo, field), (2, HaloField::NextProgenitor));
        assert_eq!(kind, CorruptKind::OutOfRange { value: -2, len: 3 });
    }

    #[test]
    fn test_backward_in_time() {
        let mut halos = merger();
        halos[0].snap_num = 3;
        let (halo, field, kind) = corrupt_kind(&build(halos).unwrap_err());
        assert_eq!((halo, field), (1, HaloField::Descendant));
        assert_eq!(kind, CorruptKind::BackwardInTime { snap: 4, descendant_snap: 3 });
    }

    #[test]
    fn test_long_cycle_detected() {
        let halos = (0..4)
            .map(|i| HaloRecord::at_snapshot(7).with_descendant((i + 1) % 4))
            .collect::<Vec<_>>();
        let (_, field, kind) = corrupt_kind(&build(halos).unwrap_err());
        assert_eq!(field, HaloField::Descendant);
        assert_eq!(kind, CorruptKind::DescendantCycle);
    }

    #[test]
    fn test_progenitor_missing_from_list() {
        let mut halos = merger();
        halos[1].next_progenitor = NONE;
        let (halo, field, kind) = corrupt_kind(&build(halos).unwrap_err());
        assert_eq!((halo, field, kind), (0, HaloField::FirstProgenitor, CorruptKind::ProgenitorList));
    }

    #[test]
    fn test_progenitor_list_loop() {
        let mut halos = merger();
        halos[2].next_progenitor = 1;
        let (halo, _, kind) = corrupt_kind(&build(halos).unwrap_err());
        assert_eq!(halo, 1);
        assert_eq!(kind, CorruptKind::ProgenitorList);
    }

    #[test]
    fn test_progenitor_with_wrong_descendant() {
        let mut halos = merger();
        halos.push(HaloRecord::at_snapshot(3).with_descendant(1));
        // halo 3 is listed under 0 but descends into 1
        halos[2].next_progenitor = 3;
        let (halo, field, kind) = corrupt_kind(&build(halos).unwrap_err());
        assert_eq!((halo, field, kind), (3, HaloField::Descendant, CorruptKind::ProgenitorList));
    }

    #[test]
    fn test_root_with_sibling_link() {
        let mut halos = merger();
        // A later root claims halo 1 as its sibling
        halos.push(HaloRecord::at_snapshot(6).with_progenitors(NONE, 1).with_fof(3, NONE));
        let (halo, field, kind) = corrupt_kind(&build(halos).unwrap_err());
        assert_eq!((halo, field, kind), (3, HaloField::NextProgenitor, CorruptKind::ProgenitorList));
    }

    #[test]
    fn test_fof_head_not_canonical() {
        let mut halos = merger();
        halos[1].first_halo_in_fof_group = 2;
        let (_, field, kind) = corrupt_kind(&build(halos).unwrap_err());
        assert_eq!(field, HaloField::FirstHaloInFofGroup);
        assert_eq!(kind, CorruptKind::FofGroup);
    }

    #[test]
    fn test_fof_member_not_linked() {
        let mut halos = merger();
        halos[1].next_halo_in_fof_group = NONE;
        let (halo, _, kind) = corrupt_kind(&build(halos).unwrap_err());
        assert_eq!(halo, 1);
        assert_eq!(kind, CorruptKind::FofGroup);
    }

    #[test]
    fn test_skip_only_checks_ranges() {
        let halos = vec![
            HaloRecord::at_snapshot(1).with_descendant(1),
            HaloRecord::at_snapshot(0).with_descendant(0),
        ];
        let tree = TreeBuilder::new(9).validation(Validation::Skip).build(halos.clone(), 2).unwrap();
        assert!(!tree.is_validated());
        assert_eq!(tree.index(), 9);

        let mut bad = halos;
        bad[0].descendant = 2;
        let err = TreeBuilder::new(9).validation(Validation::Skip).build(bad, 2).unwrap_err();
        assert!(matches!(err, LhtError::CorruptTree { tree: 9, .. }));
    }

    #[test]
    fn test_empty_tree() {
        let tree = build(Vec::new()).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.roots().count(), 0);
    }
}
