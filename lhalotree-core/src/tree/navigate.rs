//! Read-only traversal over a built [`Tree`].
//!
//! Linked-list relations are exposed as iterators rather than recursion, so
//! stack depth does not grow with tree size. Every walk is bounded by the
//! tree's halo count: on a validated tree the bound is never reached, on a
//! tree built with [`Validation::Skip`](super::Validation::Skip) a corrupt
//! link ends the walk with a [`LhtError::Traversal`] item instead of looping.
//!
//! Walks are `Clone`; calling the constructor again restarts from the top.

use super::{HaloField, HaloIndex, Tree};
use crate::error::{LhtError, Result};
use std::collections::VecDeque;

/// Iterator following one link field from halo to halo
#[derive(Debug, Clone)]
pub struct LinkWalk<'t> {
    tree: &'t Tree,
    start: HaloIndex,
    next: Option<HaloIndex>,
    field: HaloField,
    steps: usize,
    failed: bool,
}

impl<'t> LinkWalk<'t> {
    fn new(tree: &'t Tree, start: HaloIndex, first: Option<HaloIndex>, field: HaloField) -> Self {
        Self { tree, start, next: first, field, steps: 0, failed: false }
    }

    fn fail(&mut self) -> Option<Result<HaloIndex>> {
        self.failed = true;
        Some(Err(LhtError::Traversal { start: self.start, field: self.field, steps: self.steps }))
    }
}

impl Iterator for LinkWalk<'_> {
    type Item = Result<HaloIndex>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let current = self.next?;

        // A list can hold every halo once, never more
        if self.steps >= self.tree.len() {
            return self.fail();
        }
        let Some(halo) = self.tree.halos().get(current as usize) else {
            return self.fail();
        };

        self.steps += 1;
        self.next = halo.link(self.field);
        Some(Ok(current))
    }
}

/// Visiting order of a [`SubtreeWalk`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Order {
    DepthFirst,
    BreadthFirst,
}

/// Iterator over a halo and all of its progenitors, transitively
#[derive(Debug, Clone)]
pub struct SubtreeWalk<'t> {
    tree: &'t Tree,
    start: HaloIndex,
    frontier: VecDeque<HaloIndex>,
    order: Order,
    visited: usize,
    failed: bool,
}

impl Iterator for SubtreeWalk<'_> {
    type Item = Result<HaloIndex>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let current = match self.order {
            Order::DepthFirst => self.frontier.pop_back()?,
            Order::BreadthFirst => self.frontier.pop_front()?,
        };

        if self.visited >= self.tree.len() {
            self.failed = true;
            return Some(Err(LhtError::Traversal {
                start: self.start,
                field: HaloField::FirstProgenitor,
                steps: self.visited,
            }));
        }
        self.visited += 1;

        let children = self.tree.children.get(current as usize);
        match self.order {
            // Reversed so the lowest index pops first
            Order::DepthFirst => self.frontier.extend(children.iter().rev()),
            Order::BreadthFirst => self.frontier.extend(children),
        }
        Some(Ok(current))
    }
}

/// Direct progenitors of `halo`, following `first_progenitor` then
/// `next_progenitor`.
///
/// # Errors
///
/// Returns [`LhtError::IndexOutOfRange`] if `halo` is not in the tree.
pub fn progenitors(tree: &Tree, halo: HaloIndex) -> Result<LinkWalk<'_>> {
    let first = tree.halo(halo)?.link(HaloField::FirstProgenitor);
    Ok(LinkWalk::new(tree, halo, first, HaloField::NextProgenitor))
}

/// Members of `halo`'s FOF group, starting from the group's first halo.
///
/// # Errors
///
/// Returns [`LhtError::IndexOutOfRange`] if `halo` is not in the tree.
pub fn fof_group_members(tree: &Tree, halo: HaloIndex) -> Result<LinkWalk<'_>> {
    let head = tree.group_head(halo)?;
    Ok(LinkWalk::new(tree, halo, Some(head), HaloField::NextHaloInFofGroup))
}

/// Descendants of `halo` up to its root, excluding `halo` itself.
///
/// # Errors
///
/// Returns [`LhtError::IndexOutOfRange`] if `halo` is not in the tree.
pub fn descendant_chain(tree: &Tree, halo: HaloIndex) -> Result<LinkWalk<'_>> {
    let first = tree.halo(halo)?.link(HaloField::Descendant);
    Ok(LinkWalk::new(tree, halo, first, HaloField::Descendant))
}

/// The main progenitor branch of `halo`: its first progenitor, that halo's
/// first progenitor, and so on. `halo` itself is not yielded.
///
/// # Errors
///
/// Returns [`LhtError::IndexOutOfRange`] if `halo` is not in the tree.
pub fn main_branch(tree: &Tree, halo: HaloIndex) -> Result<LinkWalk<'_>> {
    let first = tree.halo(halo)?.link(HaloField::FirstProgenitor);
    Ok(LinkWalk::new(tree, halo, first, HaloField::FirstProgenitor))
}

/// `halo` and its whole progenitor subtree in depth-first pre-order.
///
/// # Errors
///
/// Returns [`LhtError::IndexOutOfRange`] if `halo` is not in the tree.
pub fn depth_first(tree: &Tree, halo: HaloIndex) -> Result<SubtreeWalk<'_>> {
    subtree(tree, halo, Order::DepthFirst)
}

/// `halo` and its whole progenitor subtree, one generation at a time.
///
/// # Errors
///
/// Returns [`LhtError::IndexOutOfRange`] if `halo` is not in the tree.
pub fn breadth_first(tree: &Tree, halo: HaloIndex) -> Result<SubtreeWalk<'_>> {
    subtree(tree, halo, Order::BreadthFirst)
}

fn subtree(tree: &Tree, halo: HaloIndex, order: Order) -> Result<SubtreeWalk<'_>> {
    tree.halo(halo)?;
    Ok(SubtreeWalk {
        tree,
        start: halo,
        frontier: VecDeque::from([halo]),
        order,
        visited: 0,
        failed: false,
    })
}

/// Returns true if `halo` has no descendant.
///
/// # Errors
///
/// Returns [`LhtError::IndexOutOfRange`] if `halo` is not in the tree.
pub fn is_root(tree: &Tree, halo: HaloIndex) -> Result<bool> {
    Ok(tree.halo(halo)?.link(HaloField::Descendant).is_none())
}

/// Returns true if `halo` has no progenitor.
///
/// # Errors
///
/// Returns [`LhtError::IndexOutOfRange`] if `halo` is not in the tree.
pub fn is_leaf(tree: &Tree, halo: HaloIndex) -> Result<bool> {
    Ok(tree.halo(halo)?.link(HaloField::FirstProgenitor).is_none())
}
