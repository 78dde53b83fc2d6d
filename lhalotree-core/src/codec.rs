//! Byte-order aware primitives shared by the header and halo record codecs.
//!
//! LHaloTree files carry no byte-order mark. Files written on a big-endian
//! machine must be read with [`Endian::Big`]; everything else defaults to
//! little-endian.

use crate::error::{LhtError, Result};

/// Byte order of every integer and float in a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    /// Least significant byte first
    #[default]
    Little,
    /// Most significant byte first
    Big,
    /// Whatever the host uses
    Native,
}

impl Endian {
    /// Resolves `Native` to the concrete order of the host.
    #[must_use]
    pub const fn resolve(self) -> Self {
        match self {
            Self::Native if cfg!(target_endian = "big") => Self::Big,
            Self::Native => Self::Little,
            other => other,
        }
    }
}

/// Forward-only reader over a borrowed byte window
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    endian: Endian,
    what: &'static str,
}

impl<'a> ByteCursor<'a> {
    /// Creates a cursor at the start of `bytes`.
    ///
    /// `what` names the structure being decoded and appears in truncation errors.
    #[must_use]
    pub const fn new(bytes: &'a [u8], endian: Endian, what: &'static str) -> Self {
        Self { bytes, pos: 0, endian: endian.resolve(), what }
    }

    /// Number of bytes consumed so far
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Fails with `Truncated` unless `len` more bytes are available.
    ///
    /// # Errors
    ///
    /// Returns [`LhtError::Truncated`] if fewer than `len` bytes remain.
    pub fn require(&self, len: u64) -> Result<()> {
        let available = self.remaining() as u64;
        if available < len {
            return Err(LhtError::Truncated {
                what: self.what,
                needed: self.pos as u64 + len,
                available: self.bytes.len() as u64,
            });
        }
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.require(N as u64)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Reads a 4-byte unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns [`LhtError::Truncated`] at end of input.
    pub fn read_u32(&mut self) -> Result<u32> {
        let raw = self.take::<4>()?;
        Ok(match self.endian {
            Endian::Big => u32::from_be_bytes(raw),
            _ => u32::from_le_bytes(raw),
        })
    }

    /// Reads a 4-byte signed integer.
    ///
    /// # Errors
    ///
    /// Returns [`LhtError::Truncated`] at end of input.
    pub fn read_i32(&mut self) -> Result<i32> {
        let raw = self.take::<4>()?;
        Ok(match self.endian {
            Endian::Big => i32::from_be_bytes(raw),
            _ => i32::from_le_bytes(raw),
        })
    }

    /// Reads an 8-byte unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns [`LhtError::Truncated`] at end of input.
    pub fn read_u64(&mut self) -> Result<u64> {
        let raw = self.take::<8>()?;
        Ok(match self.endian {
            Endian::Big => u64::from_be_bytes(raw),
            _ => u64::from_le_bytes(raw),
        })
    }

    /// Reads a 4-byte IEEE-754 float.
    ///
    /// # Errors
    ///
    /// Returns [`LhtError::Truncated`] at end of input.
    pub fn read_f32(&mut self) -> Result<f32> {
        self.read_u32().map(f32::from_bits)
    }

    /// Reads three consecutive floats.
    ///
    /// # Errors
    ///
    /// Returns [`LhtError::Truncated`] at end of input.
    pub fn read_f32x3(&mut self) -> Result<[f32; 3]> {
        Ok([self.read_f32()?, self.read_f32()?, self.read_f32()?])
    }
}

/// Append-only writer producing the same layout `ByteCursor` reads
#[derive(Debug)]
pub struct ByteSink<'a> {
    out: &'a mut Vec<u8>,
    endian: Endian,
}

impl<'a> ByteSink<'a> {
    /// Wraps `out`; bytes are appended after its current contents.
    pub fn new(out: &'a mut Vec<u8>, endian: Endian) -> Self {
        Self { out, endian: endian.resolve() }
    }

    /// Appends a 4-byte unsigned integer.
    pub fn put_u32(&mut self, value: u32) {
        match self.endian {
            Endian::Big => self.out.extend_from_slice(&value.to_be_bytes()),
            _ => self.out.extend_from_slice(&value.to_le_bytes()),
        }
    }

    /// Appends a 4-byte signed integer.
    pub fn put_i32(&mut self, value: i32) {
        match self.endian {
            Endian::Big => self.out.extend_from_slice(&value.to_be_bytes()),
            _ => self.out.extend_from_slice(&value.to_le_bytes()),
        }
    }

    /// Appends an 8-byte unsigned integer.
    pub fn put_u64(&mut self, value: u64) {
        match self.endian {
            Endian::Big => self.out.extend_from_slice(&value.to_be_bytes()),
            _ => self.out.extend_from_slice(&value.to_le_bytes()),
        }
    }

    /// Appends a float, bit for bit.
    pub fn put_f32(&mut self, value: f32) {
        self.put_u32(value.to_bits());
    }

    /// Appends three floats.
    pub fn put_f32x3(&mut self, values: [f32; 3]) {
        for v in values {
            self.put_f32(v);
        }
    }
}
