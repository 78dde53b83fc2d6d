use crate::codec::{ByteCursor, ByteSink, Endian};
use crate::error::{LhtError, Result};
use crate::tree::HALO_RECORD_SIZE;

/// Maximum number of trees accepted in one file.
/// This is a sanity check to catch misaligned or corrupted headers.
/// Production forests hold a few hundred thousand trees per file.
pub const MAX_TREES: u32 = 1 << 26;

/// Size of one header word in bytes
const WORD: usize = 4;

/// Which fields precede the per-tree halo counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderLayout {
    /// `tree_count`, then `halos_per_tree[tree_count]`
    #[default]
    Bare,
    /// `tree_count`, `total_halos`, then `halos_per_tree[tree_count]`
    Counted,
}

impl HeaderLayout {
    /// Number of fixed words before the halo counts
    const fn prefix_words(self) -> usize {
        match self {
            Self::Bare => 1,
            Self::Counted => 2,
        }
    }
}

/// Decoded file header: tree count and halo count per tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Number of trees in the file
    pub tree_count: u32,

    /// Halo count of each tree, in file order
    pub halos_per_tree: Vec<u32>,

    layout: HeaderLayout,
}

impl FileHeader {
    /// Creates a header describing trees with the given halo counts.
    ///
    /// # Errors
    ///
    /// Returns an error if there are more than `u32::MAX` trees.
    pub fn new(halos_per_tree: Vec<u32>, layout: HeaderLayout) -> Result<Self> {
        let tree_count = u32::try_from(halos_per_tree.len())
            .map_err(|_| LhtError::format("header", "more than u32::MAX trees"))?;
        Ok(Self { tree_count, halos_per_tree, layout })
    }

    /// Decodes the header at the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The source ends before the counts are fully read
    /// - `tree_count` exceeds `max_trees`
    /// - A `Counted` header's total disagrees with the per-tree counts
    /// - The implied file length does not fit in 64 bits
    pub fn decode(bytes: &[u8], endian: Endian, layout: HeaderLayout, max_trees: u32) -> Result<Self> {
        let mut cursor = ByteCursor::new(bytes, endian, "header");

        let tree_count = cursor.read_u32()?;
        if tree_count > max_trees {
            return Err(LhtError::format(
                "header",
                format!("tree count {tree_count} exceeds limit {max_trees}"),
            ));
        }

        let stored_total = match layout {
            HeaderLayout::Bare => None,
            HeaderLayout::Counted => Some(cursor.read_u32()?),
        };

        // Check the whole table up front so a bogus count fails before allocating
        cursor.require(u64::from(tree_count) * WORD as u64)?;

        let mut halos_per_tree = Vec::with_capacity(tree_count as usize);
        for _ in 0..tree_count {
            halos_per_tree.push(cursor.read_u32()?);
        }

        let header = Self { tree_count, halos_per_tree, layout };

        if let Some(stored) = stored_total {
            let total = header.total_halos();
            if u64::from(stored) != total {
                return Err(LhtError::format(
                    "header",
                    format!("stored halo total {stored} does not match sum of tree counts {total}"),
                ));
            }
        }

        header.expected_file_len()?;

        debug_assert_eq!(cursor.position(), header.header_size());
        Ok(header)
    }

    /// Appends the encoded header to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if a `Counted` header's total does not fit in 32 bits.
    pub fn encode(&self, endian: Endian, out: &mut Vec<u8>) -> Result<()> {
        let mut sink = ByteSink::new(out, endian);
        sink.put_u32(self.tree_count);

        if self.layout == HeaderLayout::Counted {
            let total = u32::try_from(self.total_halos()).map_err(|_| {
                LhtError::format("header", "total halo count does not fit in 32 bits")
            })?;
            sink.put_u32(total);
        }

        for &count in &self.halos_per_tree {
            sink.put_u32(count);
        }
        Ok(())
    }

    /// Layout this header was decoded with
    #[must_use]
    pub const fn layout(&self) -> HeaderLayout {
        self.layout
    }

    /// Bytes occupied by the header on disk
    #[must_use]
    pub fn header_size(&self) -> usize {
        (self.layout.prefix_words() + self.tree_count as usize) * WORD
    }

    /// Sum of all per-tree halo counts
    #[must_use]
    pub fn total_halos(&self) -> u64 {
        self.halos_per_tree.iter().map(|&n| u64::from(n)).sum()
    }

    /// File length implied by the header: header plus every halo record
    ///
    /// # Errors
    ///
    /// Returns an error if the length does not fit in 64 bits.
    pub fn expected_file_len(&self) -> Result<u64> {
        self.total_halos()
            .checked_mul(HALO_RECORD_SIZE as u64)
            .and_then(|records| records.checked_add(self.header_size() as u64))
            .ok_or_else(|| too_large(self.total_halos()))
    }

    /// Byte offset of the first record of every tree, plus the end offset.
    ///
    /// The returned table has `tree_count + 1` entries; tree `i` spans
    /// `offsets[i]..offsets[i + 1]`.
    ///
    /// # Errors
    ///
    /// Returns an error if an offset does not fit in 64 bits.
    pub fn tree_offsets(&self) -> Result<Vec<u64>> {
        let mut offsets = Vec::with_capacity(self.halos_per_tree.len() + 1);
        let mut offset = self.header_size() as u64;
        offsets.push(offset);
        for &count in &self.halos_per_tree {
            offset = u64::from(count)
                .checked_mul(HALO_RECORD_SIZE as u64)
                .and_then(|bytes| offset.checked_add(bytes))
                .ok_or_else(|| too_large(self.total_halos()))?;
            offsets.push(offset);
        }
        Ok(offsets)
    }
}

fn too_large(total: u64) -> LhtError {
    LhtError::format("header", format!("{total} halo records overflow a 64-bit file length"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn encoded(header: &FileHeader, endian: Endian) -> Vec<u8> {
        let mut out = Vec::new();
        header.encode(endian, &mut out).unwrap();
        out
    }

    #[test]
    fn test_bare_header_size() {
        let header = FileHeader::new(vec![3, 0, 7], HeaderLayout::Bare).unwrap();
        assert_eq!(header.header_size(), 16);
        assert_eq!(encoded(&header, Endian::Little).len(), 16);
        assert_eq!(header.total_halos(), 10);
        assert_eq!(header.expected_file_len().unwrap(), 16 + 10 * HALO_RECORD_SIZE as u64);
    }

    #[test]
    fn test_counted_header_roundtrip() {
        let header = FileHeader::new(vec![5, 9], HeaderLayout::Counted).unwrap();
        let bytes = encoded(&header, Endian::Big);
        assert_eq!(bytes.len(), 16);

        let decoded = FileHeader::decode(&bytes, Endian::Big, HeaderLayout::Counted, MAX_TREES).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_counted_total_mismatch() {
        let header = FileHeader::new(vec![5, 9], HeaderLayout::Counted).unwrap();
        let mut bytes = encoded(&header, Endian::Little);
        bytes[4] = 13; // stored total 13 instead of 14

        let err = FileHeader::decode(&bytes, Endian::Little, HeaderLayout::Counted, MAX_TREES).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_truncated_table() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());

        let err = FileHeader::decode(&bytes, Endian::Little, HeaderLayout::Bare, MAX_TREES).unwrap_err();
        assert!(matches!(err, LhtError::Truncated { needed: 20, available: 8, .. }));
    }

    #[test]
    fn test_implausible_tree_count() {
        let bytes = u32::MAX.to_le_bytes();
        let err = FileHeader::decode(&bytes, Endian::Little, HeaderLayout::Bare, MAX_TREES).unwrap_err();
        assert!(matches!(err, LhtError::Format { .. }));
    }

    #[test]
    fn test_tree_offsets() {
        let header = FileHeader::new(vec![2, 0, 1], HeaderLayout::Bare).unwrap();
        let r = HALO_RECORD_SIZE as u64;
        assert_eq!(header.tree_offsets().unwrap(), vec![16, 16 + 2 * r, 16 + 2 * r, 16 + 3 * r]);
    }

    #[test]
    fn test_record_bytes_overflow() {
        // Smallest tree count at which u32::MAX halos per tree overflow u64 bytes
        let trees = (u64::MAX / HALO_RECORD_SIZE as u64 / u64::from(u32::MAX) + 1) as usize;
        let header = FileHeader::new(vec![u32::MAX; trees], HeaderLayout::Bare).unwrap();

        assert!(matches!(header.expected_file_len().unwrap_err(), LhtError::Format { what: "header", .. }));
        assert_eq!(header.tree_offsets().unwrap_err().kind(), ErrorKind::Format);

        let bytes = encoded(&header, Endian::Little);
        let err = FileHeader::decode(&bytes, Endian::Little, HeaderLayout::Bare, MAX_TREES).unwrap_err();
        assert!(err.to_string().contains("overflow"));
    }
}
