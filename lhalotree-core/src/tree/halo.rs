//! Fixed-width halo record layout.
//!
//! # Layout (104 bytes)
//!
//! Every halo is stored as the `halo_data` struct used by the L-Galaxies
//! family of merger-tree codes. Records are packed back to back, so halo `h`
//! of a tree starts at `tree_offset + h * HALO_RECORD_SIZE`.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       4     descendant: i32
//! 4       4     first_progenitor: i32
//! 8       4     next_progenitor: i32
//! 12      4     first_halo_in_fof_group: i32
//! 16      4     next_halo_in_fof_group: i32
//! 20      4     len: i32 (particle count)
//! 24      4     m_mean200: f32
//! 28      4     mvir: f32
//! 32      4     m_tophat: f32
//! 36      12    pos: [f32; 3]
//! 48      12    vel: [f32; 3]
//! 60      4     vel_disp: f32
//! 64      4     vmax: f32
//! 68      12    spin: [f32; 3]
//! 80      8     most_bound_id: u64
//! 88      4     snap_num: i32
//! 92      4     file_nr: i32
//! 96      4     subhalo_index: i32
//! 100     4     sub_half_mass: f32
//! ```
//!
//! The five reference fields hold tree-local indices or [`NONE`].

use crate::codec::{ByteCursor, ByteSink, Endian};
use crate::error::Result;
use std::fmt;

/// Size of one halo record in bytes
pub const HALO_RECORD_SIZE: usize = 104;

/// Sentinel stored in a reference field meaning "no halo"
pub const NONE: i32 = -1;

/// One of the five intra-tree reference fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HaloField {
    /// Halo this one evolves into
    Descendant,
    /// Head of the progenitor list
    FirstProgenitor,
    /// Next sibling in the progenitor list
    NextProgenitor,
    /// Canonical first halo of the FOF group
    FirstHaloInFofGroup,
    /// Next member of the FOF group
    NextHaloInFofGroup,
}

impl HaloField {
    /// All reference fields in on-disk order
    pub const ALL: [Self; 5] = [
        Self::Descendant,
        Self::FirstProgenitor,
        Self::NextProgenitor,
        Self::FirstHaloInFofGroup,
        Self::NextHaloInFofGroup,
    ];

    /// Field name as it appears in diagnostics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Descendant => "descendant",
            Self::FirstProgenitor => "first_progenitor",
            Self::NextProgenitor => "next_progenitor",
            Self::FirstHaloInFofGroup => "first_halo_in_fof_group",
            Self::NextHaloInFofGroup => "next_halo_in_fof_group",
        }
    }
}

impl fmt::Display for HaloField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded halo.
///
/// Reference fields keep their raw stored value so that a corrupt value can
/// be reported exactly; use [`HaloRecord::link`] to read them as indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HaloRecord {
    /// Halo this one evolves into, or `NONE`
    pub descendant: i32,
    /// Most massive progenitor, or `NONE`
    pub first_progenitor: i32,
    /// Next progenitor sharing the same descendant, or `NONE`
    pub next_progenitor: i32,
    /// Central halo of the FOF group
    pub first_halo_in_fof_group: i32,
    /// Next halo in the FOF group, or `NONE`
    pub next_halo_in_fof_group: i32,

    /// Number of particles
    pub len: i32,
    /// Mass within the radius enclosing 200 times the mean density
    pub m_mean200: f32,
    /// Virial mass
    pub mvir: f32,
    /// Mass within the top-hat collapse radius
    pub m_tophat: f32,
    /// Position
    pub pos: [f32; 3],
    /// Peculiar velocity
    pub vel: [f32; 3],
    /// Velocity dispersion
    pub vel_disp: f32,
    /// Maximum circular velocity
    pub vmax: f32,
    /// Spin vector
    pub spin: [f32; 3],
    /// Id of the most bound particle
    pub most_bound_id: u64,
    /// Snapshot number
    pub snap_num: i32,
    /// Halo-finder output file this halo came from
    pub file_nr: i32,
    /// Index of the subhalo in the halo-finder catalogue
    pub subhalo_index: i32,
    /// Mass enclosed within half the subhalo's particles
    pub sub_half_mass: f32,
}

impl HaloRecord {
    /// Creates a record at `snap_num` with every reference set to `NONE` and
    /// all physical quantities zeroed.
    #[must_use]
    pub const fn at_snapshot(snap_num: i32) -> Self {
        Self {
            descendant: NONE,
            first_progenitor: NONE,
            next_progenitor: NONE,
            first_halo_in_fof_group: NONE,
            next_halo_in_fof_group: NONE,
            len: 0,
            m_mean200: 0.0,
            mvir: 0.0,
            m_tophat: 0.0,
            pos: [0.0; 3],
            vel: [0.0; 3],
            vel_disp: 0.0,
            vmax: 0.0,
            spin: [0.0; 3],
            most_bound_id: 0,
            snap_num,
            file_nr: 0,
            subhalo_index: 0,
            sub_half_mass: 0.0,
        }
    }

    /// Sets the descendant reference.
    #[must_use]
    pub const fn with_descendant(mut self, descendant: i32) -> Self {
        self.descendant = descendant;
        self
    }

    /// Sets the progenitor list references.
    #[must_use]
    pub const fn with_progenitors(mut self, first: i32, next: i32) -> Self {
        self.first_progenitor = first;
        self.next_progenitor = next;
        self
    }

    /// Sets the FOF group references.
    #[must_use]
    pub const fn with_fof(mut self, first: i32, next: i32) -> Self {
        self.first_halo_in_fof_group = first;
        self.next_halo_in_fof_group = next;
        self
    }

    /// Sets the virial mass and particle count.
    #[must_use]
    pub const fn with_mass(mut self, mvir: f32, len: i32) -> Self {
        self.mvir = mvir;
        self.len = len;
        self
    }

    /// Raw stored value of a reference field
    #[must_use]
    pub const fn raw_link(&self, field: HaloField) -> i32 {
        match field {
            HaloField::Descendant => self.descendant,
            HaloField::FirstProgenitor => self.first_progenitor,
            HaloField::NextProgenitor => self.next_progenitor,
            HaloField::FirstHaloInFofGroup => self.first_halo_in_fof_group,
            HaloField::NextHaloInFofGroup => self.next_halo_in_fof_group,
        }
    }

    /// Reference field as a halo index, or `None` for the sentinel.
    ///
    /// Negative values other than `NONE` also read as `None`; trees built by
    /// `TreeBuilder` never contain them.
    #[inline]
    #[must_use]
    pub fn link(&self, field: HaloField) -> Option<u32> {
        u32::try_from(self.raw_link(field)).ok()
    }

    /// Decodes one record from the start of `window`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LhtError::Truncated`] if `window` is shorter than
    /// [`HALO_RECORD_SIZE`].
    pub fn decode(window: &[u8], endian: Endian) -> Result<Self> {
        let mut c = ByteCursor::new(window, endian, "halo record");
        c.require(HALO_RECORD_SIZE as u64)?;

        Ok(Self {
            descendant: c.read_i32()?,
            first_progenitor: c.read_i32()?,
            next_progenitor: c.read_i32()?,
            first_halo_in_fof_group: c.read_i32()?,
            next_halo_in_fof_group: c.read_i32()?,
            len: c.read_i32()?,
            m_mean200: c.read_f32()?,
            mvir: c.read_f32()?,
            m_tophat: c.read_f32()?,
            pos: c.read_f32x3()?,
            vel: c.read_f32x3()?,
            vel_disp: c.read_f32()?,
            vmax: c.read_f32()?,
            spin: c.read_f32x3()?,
            most_bound_id: c.read_u64()?,
            snap_num: c.read_i32()?,
            file_nr: c.read_i32()?,
            subhalo_index: c.read_i32()?,
            sub_half_mass: c.read_f32()?,
        })
    }

    /// Appends the encoded record to `out`.
    pub fn encode(&self, endian: Endian, out: &mut Vec<u8>) {
        let mut s = ByteSink::new(out, endian);
        s.put_i32(self.descendant);
        s.put_i32(self.first_progenitor);
        s.put_i32(self.next_progenitor);
        s.put_i32(self.first_halo_in_fof_group);
        s.put_i32(self.next_halo_in_fof_group);
        s.put_i32(self.len);
        s.put_f32(self.m_mean200);
        s.put_f32(self.mvir);
        s.put_f32(self.m_tophat);
        s.put_f32x3(self.pos);
        s.put_f32x3(self.vel);
        s.put_f32(self.vel_disp);
        s.put_f32(self.vmax);
        s.put_f32x3(self.spin);
        s.put_u64(self.most_bound_id);
        s.put_i32(self.snap_num);
        s.put_i32(self.file_nr);
        s.put_i32(self.subhalo_index);
        s.put_f32(self.sub_half_mass);
    }
}
