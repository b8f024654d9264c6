//! Bounds-checked reading over an immutable packet buffer.
//!
//! [`ByteCursor`] is the single place where offsets are validated: every read
//! checks the remaining region before touching bytes, fails with
//! [`DecodeError::OutOfBounds`] without moving the position, and can never be
//! driven past the end of the buffer by a crafted length field. All decode
//! primitives and walkers are built on top of it.
//!
//! A cursor is a *view*: it keeps a reference to the whole original message
//! buffer plus absolute `start`/`end` bounds for its region. Child cursors
//! from [`ByteCursor::sub_cursor`] or [`ByteCursor::take_region`] share the
//! buffer with narrower bounds, so positions and [`ByteRange`]s are absolute
//! in the original message and nest without translation.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::fmt;

/// Byte order for multi-byte fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Endianness {
    Big,
    Little,
}

/// Absolute byte range into the original message buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: usize,
    pub len: usize,
}

impl ByteRange {
    pub fn new(start: usize, len: usize) -> Self {
        ByteRange { start, len }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// True if `other` lies fully inside this range.
    pub fn contains(&self, other: &ByteRange) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end())
    }
}

/// Decode failure. Almost everything recoverable is reported through
/// diagnostics instead; `OutOfBounds` and `IndefiniteLength` stay local to
/// one primitive call (caught and downgraded by the caller), while `Framing`
/// aborts the whole decode.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// A read of `wanted` bytes at `at` would cross the region end.
    #[error("read of {wanted} byte(s) at offset {at} crosses region end {end}")]
    OutOfBounds { at: usize, wanted: usize, end: usize },
    /// A sized value region was requested from an indefinite-length header;
    /// indefinite regions are iterated to their terminator instead.
    #[error("indefinite-length header has no sized value region")]
    IndefiniteLength,
    /// Message framing could not be established; no partial tree exists.
    #[error("unreadable framing: {0}")]
    Framing(String),
}

/// Bounds-checked read position over a region of an immutable buffer.
///
/// Invariant: `start <= pos <= end <= data.len()`. A failed read leaves `pos`
/// unchanged (no partial consumption).
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    start: usize,
    end: usize,
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Cursor over a whole message buffer.
    pub fn new(data: &'a [u8]) -> Self {
        ByteCursor {
            data,
            start: 0,
            end: data.len(),
            pos: 0,
        }
    }

    /// Absolute read position within the original buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Position relative to the region start (used for alignment).
    pub fn rel_position(&self) -> usize {
        self.pos - self.start
    }

    /// Bytes left in this region.
    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.end
    }

    /// The whole region as a range.
    pub fn region(&self) -> ByteRange {
        ByteRange::new(self.start, self.end - self.start)
    }

    /// Range from an earlier position (a saved `position()`) up to the
    /// current one.
    pub fn range_from(&self, start: usize) -> ByteRange {
        ByteRange::new(start, self.pos - start)
    }

    /// Next byte without consuming it, `None` at end of region.
    pub fn peek_u8(&self) -> Option<u8> {
        if self.pos < self.end {
            Some(self.data[self.pos])
        } else {
            None
        }
    }

    /// The whole region as a slice, regardless of the read position.
    pub fn region_bytes(&self) -> &'a [u8] {
        &self.data[self.start..self.end]
    }

    /// Everything from the read position to the region end, consuming it.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let s = &self.data[self.pos..self.end];
        self.pos = self.end;
        s
    }

    /// Borrow the next `n` bytes and advance past them. The returned slice
    /// aliases the original buffer; nothing is copied.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        // remaining() can never underflow, so this comparison cannot wrap
        // even for attacker-supplied n close to usize::MAX.
        if n > self.remaining() {
            return Err(DecodeError::OutOfBounds {
                at: self.pos,
                wanted: n,
                end: self.end,
            });
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Advance past `n` bytes without looking at them.
    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.read_bytes(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self, endian: Endianness) -> Result<u16, DecodeError> {
        let b = self.read_bytes(2)?;
        Ok(match endian {
            Endianness::Big => BigEndian::read_u16(b),
            Endianness::Little => LittleEndian::read_u16(b),
        })
    }

    pub fn read_u24(&mut self, endian: Endianness) -> Result<u32, DecodeError> {
        let b = self.read_bytes(3)?;
        Ok(match endian {
            Endianness::Big => BigEndian::read_u24(b),
            Endianness::Little => LittleEndian::read_u24(b),
        })
    }

    pub fn read_u32(&mut self, endian: Endianness) -> Result<u32, DecodeError> {
        let b = self.read_bytes(4)?;
        Ok(match endian {
            Endianness::Big => BigEndian::read_u32(b),
            Endianness::Little => LittleEndian::read_u32(b),
        })
    }

    pub fn read_u64(&mut self, endian: Endianness) -> Result<u64, DecodeError> {
        let b = self.read_bytes(8)?;
        Ok(match endian {
            Endianness::Big => BigEndian::read_u64(b),
            Endianness::Little => LittleEndian::read_u64(b),
        })
    }

    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self, endian: Endianness) -> Result<i16, DecodeError> {
        Ok(self.read_u16(endian)? as i16)
    }

    pub fn read_i32(&mut self, endian: Endianness) -> Result<i32, DecodeError> {
        Ok(self.read_u32(endian)? as i32)
    }

    pub fn read_i64(&mut self, endian: Endianness) -> Result<i64, DecodeError> {
        Ok(self.read_u64(endian)? as i64)
    }

    /// IEEE-754 half-precision, widened to `f64`. See [`half_to_f64`].
    pub fn read_f16(&mut self, endian: Endianness) -> Result<f64, DecodeError> {
        Ok(half_to_f64(self.read_u16(endian)?))
    }

    pub fn read_f32(&mut self, endian: Endianness) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.read_u32(endian)?))
    }

    pub fn read_f64(&mut self, endian: Endianness) -> Result<f64, DecodeError> {
        Ok(f64::from_bits(self.read_u64(endian)?))
    }

    /// New cursor over `[offset, offset + len)` of the same buffer. The
    /// requested region must lie inside this cursor's region. Does not move
    /// this cursor.
    pub fn sub_cursor(&self, offset: usize, len: usize) -> Result<ByteCursor<'a>, DecodeError> {
        if offset < self.start || offset > self.end || len > self.end - offset {
            return Err(DecodeError::OutOfBounds {
                at: offset,
                wanted: len,
                end: self.end,
            });
        }
        Ok(ByteCursor {
            data: self.data,
            start: offset,
            end: offset + len,
            pos: offset,
        })
    }

    /// Child cursor over the next `len` bytes; this cursor advances past
    /// them. The standard way to descend into a TLV value region.
    pub fn take_region(&mut self, len: usize) -> Result<ByteCursor<'a>, DecodeError> {
        let child = self.sub_cursor(self.pos, len)?;
        self.pos += len;
        Ok(child)
    }
}

/// Decode a raw half-precision bit pattern into `f64`.
///
/// Manual reconstruction: subnormals scale the bare mantissa, normals add the
/// hidden bit, exponent 31 maps to Inf (zero mantissa) or NaN. The sign is
/// applied last so that `0x8000` comes out as negative zero.
pub fn half_to_f64(raw: u16) -> f64 {
    let exp = (raw >> 10) & 0x1f;
    let mant = f64::from(raw & 0x03ff);
    let val = if exp == 0 {
        mant * 2f64.powi(-24)
    } else if exp != 31 {
        (mant + 1024.0) * 2f64.powi(i32::from(exp) - 25)
    } else if mant == 0.0 {
        f64::INFINITY
    } else {
        f64::NAN
    };
    if raw & 0x8000 != 0 {
        -val
    } else {
        val
    }
}
