//! Generic type-length-value iteration.
//!
//! [`TlvWalker`] reads one header per step from a borrowed [`ByteCursor`],
//! validates the declared length against the bytes actually remaining, and
//! hands out a bounded child cursor for the value region. Every length on
//! the wire passes through this one chokepoint before anything is read from
//! the value, so a crafted length can stop a walk but never push a read past
//! the buffer.
//!
//! Two header layouts cover the shipped grammars:
//!
//! * [`TlvProfile::Plain`]: fixed-width tag then fixed-width length.
//! * [`TlvProfile::Packed`]: one byte holding a 3-bit tag and a 5-bit minor
//!   code; minors 0..=23 carry the argument inline, 24..=27 escape to a
//!   1/2/4/8-byte big-endian extension, 31 means indefinite, 28..=30 are
//!   reserved and malformed.
//!
//! A walk that reports `Malformed` stops for good: [`TlvWalker::next`]
//! returns `None` from then on and no further bytes are touched.

use crate::cursor::{ByteCursor, ByteRange, DecodeError, Endianness};
use crate::diag::Diagnostics;
use crate::field::FieldWidth;

/// What a packed header's argument means for a given type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthKind {
    /// Argument is the byte length of the value region.
    Bytes,
    /// Argument counts child items; the region is delimited by decoding them.
    Items,
    /// Argument is itself the value (or a semantic code); no value region.
    Inline,
}

/// Maps a type tag to the meaning of its argument under [`TlvProfile::Packed`].
pub type ClassifyFn = fn(u64) -> LengthKind;

/// Header layout of a TLV region.
#[derive(Debug, Clone, Copy)]
pub enum TlvProfile {
    /// Fixed-width tag and length fields.
    Plain {
        tag_width: FieldWidth,
        len_width: FieldWidth,
        endian: Endianness,
    },
    /// Single byte of tag bits plus minor-code argument.
    Packed { classify: ClassifyFn },
}

/// One decoded TLV header. Ephemeral: used to slice the value region, then
/// dropped; headers are not kept in the element tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvHeader {
    pub type_tag: u64,
    /// Raw header argument; `None` for an indefinite-length header.
    pub argument: Option<u64>,
    /// Value-region byte length, when the profile knows the argument is one.
    pub declared_len: Option<usize>,
    /// Tag and length bytes.
    pub header_range: ByteRange,
}

impl TlvHeader {
    pub fn is_indefinite(&self) -> bool {
        self.argument.is_none()
    }

    /// Bytes the argument occupied after the leading tag byte (packed
    /// profile): 0 for an inline minor, otherwise 1, 2, 4 or 8.
    pub fn extension_len(&self) -> usize {
        self.header_range.len.saturating_sub(1)
    }
}

enum HeaderFault {
    Truncated,
    Reserved(u8),
    BadIndefinite,
    LengthExceeds { declared: u64, remaining: usize },
    CountExceeds { declared: u64, remaining: usize },
}

/// Stepwise TLV iteration over a borrowed cursor region.
///
/// `next` auto-skips any part of the previous value the caller left
/// unconsumed, so the cursor is always at a header boundary when one is
/// read. Nested sub-TLVs are walked by taking [`TlvWalker::value_cursor`]
/// and running a fresh walker over it.
pub struct TlvWalker<'c, 'a> {
    cursor: &'c mut ByteCursor<'a>,
    profile: TlvProfile,
    stopped: bool,
    pending_value_end: Option<usize>,
}

impl<'c, 'a> TlvWalker<'c, 'a> {
    pub fn new(cursor: &'c mut ByteCursor<'a>, profile: TlvProfile) -> Self {
        TlvWalker {
            cursor,
            profile,
            stopped: false,
            pending_value_end: None,
        }
    }

    /// True once the walk ended, whether naturally or on a malformed header.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Read the next header. Returns `None` at the end of the region and
    /// after any malformed header; a malformed header reports one
    /// `Malformed` diagnostic and permanently stops the walk.
    pub fn next(&mut self, diags: &mut Diagnostics) -> Option<TlvHeader> {
        if self.stopped {
            return None;
        }
        if !self.settle_pending() {
            return None;
        }
        if self.cursor.is_empty() {
            self.stopped = true;
            return None;
        }
        let start = self.cursor.position();
        let header = match self.profile {
            TlvProfile::Plain {
                tag_width,
                len_width,
                endian,
            } => self.read_plain(tag_width, len_width, endian),
            TlvProfile::Packed { classify } => self.read_packed(classify),
        };
        match header {
            Ok(h) => {
                if let Some(n) = h.declared_len {
                    self.pending_value_end = Some(self.cursor.position() + n);
                }
                Some(h)
            }
            Err(fault) => {
                let (message, range) = self.describe_fault(start, fault);
                diags.malformed(message, Some(range));
                self.stopped = true;
                None
            }
        }
    }

    /// Like `next`, but for indefinite regions: when the next byte satisfies
    /// `is_terminator` it is consumed and the walk ends cleanly. Running out
    /// of bytes before the terminator is malformed.
    pub fn next_until_terminator(
        &mut self,
        diags: &mut Diagnostics,
        is_terminator: impl Fn(u8) -> bool,
    ) -> Option<TlvHeader> {
        if self.stopped {
            return None;
        }
        if !self.settle_pending() {
            return None;
        }
        match self.cursor.peek_u8() {
            None => {
                diags.malformed(
                    "indefinite container not terminated",
                    Some(ByteRange::new(self.cursor.position(), 0)),
                );
                self.stopped = true;
                None
            }
            Some(b) if is_terminator(b) => {
                let _ = self.cursor.skip(1);
                self.stopped = true;
                None
            }
            Some(_) => self.next(diags),
        }
    }

    /// Bounded cursor over exactly the declared value region; the walker's
    /// own cursor advances past it. An indefinite header has no sized region
    /// and fails with [`DecodeError::IndefiniteLength`].
    pub fn value_cursor(&mut self, header: &TlvHeader) -> Result<ByteCursor<'a>, DecodeError> {
        match header.declared_len {
            Some(n) => {
                let child = self.cursor.take_region(n)?;
                self.pending_value_end = None;
                Ok(child)
            }
            None => Err(DecodeError::IndefiniteLength),
        }
    }

    /// Advance to the next multiple of `alignment` bytes relative to the
    /// region start. Padding running into the region end is clipped.
    pub fn skip_padding(&mut self, alignment: usize) {
        if alignment <= 1 {
            return;
        }
        let rel = self.cursor.rel_position() % alignment;
        if rel == 0 {
            return;
        }
        let pad = (alignment - rel).min(self.cursor.remaining());
        if self.cursor.skip(pad).is_err() {
            self.stopped = true;
        }
    }

    /// Skip whatever the caller left of the previous value region.
    fn settle_pending(&mut self) -> bool {
        if let Some(end) = self.pending_value_end.take() {
            let pos = self.cursor.position();
            if pos < end && self.cursor.skip(end - pos).is_err() {
                self.stopped = true;
                return false;
            }
        }
        true
    }

    fn read_plain(
        &mut self,
        tag_width: FieldWidth,
        len_width: FieldWidth,
        endian: Endianness,
    ) -> Result<TlvHeader, HeaderFault> {
        let start = self.cursor.position();
        let tag = tag_width
            .read_uint(self.cursor, endian)
            .map_err(|_| HeaderFault::Truncated)?;
        let len = len_width
            .read_uint(self.cursor, endian)
            .map_err(|_| HeaderFault::Truncated)?;
        let header_range = self.cursor.range_from(start);
        if len > self.cursor.remaining() as u64 {
            return Err(HeaderFault::LengthExceeds {
                declared: len,
                remaining: self.cursor.remaining(),
            });
        }
        Ok(TlvHeader {
            type_tag: tag,
            argument: Some(len),
            declared_len: Some(len as usize),
            header_range,
        })
    }

    fn read_packed(&mut self, classify: ClassifyFn) -> Result<TlvHeader, HeaderFault> {
        let start = self.cursor.position();
        let lead = self.cursor.read_u8().map_err(|_| HeaderFault::Truncated)?;
        let tag = u64::from(lead >> 5);
        let minor = lead & 0x1f;
        let argument = match minor {
            0..=23 => Some(u64::from(minor)),
            24 => Some(u64::from(
                self.cursor.read_u8().map_err(|_| HeaderFault::Truncated)?,
            )),
            25 => Some(u64::from(
                self.cursor
                    .read_u16(Endianness::Big)
                    .map_err(|_| HeaderFault::Truncated)?,
            )),
            26 => Some(u64::from(
                self.cursor
                    .read_u32(Endianness::Big)
                    .map_err(|_| HeaderFault::Truncated)?,
            )),
            27 => Some(
                self.cursor
                    .read_u64(Endianness::Big)
                    .map_err(|_| HeaderFault::Truncated)?,
            ),
            31 => None,
            _ => return Err(HeaderFault::Reserved(minor)),
        };
        let header_range = self.cursor.range_from(start);
        let declared_len = match classify(tag) {
            LengthKind::Bytes => match argument {
                Some(n) => {
                    if n > self.cursor.remaining() as u64 {
                        return Err(HeaderFault::LengthExceeds {
                            declared: n,
                            remaining: self.cursor.remaining(),
                        });
                    }
                    Some(n as usize)
                }
                // Chunked form: child headers delimit the content.
                None => None,
            },
            LengthKind::Items => {
                if let Some(n) = argument {
                    // Each item takes at least one byte, so a count beyond
                    // the remaining bytes can never be satisfied.
                    if n > self.cursor.remaining() as u64 {
                        return Err(HeaderFault::CountExceeds {
                            declared: n,
                            remaining: self.cursor.remaining(),
                        });
                    }
                }
                None
            }
            LengthKind::Inline => {
                if argument.is_none() {
                    return Err(HeaderFault::BadIndefinite);
                }
                None
            }
        };
        Ok(TlvHeader {
            type_tag: tag,
            argument,
            declared_len,
            header_range,
        })
    }

    fn describe_fault(&self, start: usize, fault: HeaderFault) -> (String, ByteRange) {
        let consumed = self.cursor.range_from(start);
        match fault {
            HeaderFault::Truncated => (
                "truncated TLV header".into(),
                ByteRange::new(start, self.cursor.region().end() - start),
            ),
            HeaderFault::Reserved(minor) => {
                (format!("reserved length code {minor} in TLV header"), consumed)
            }
            HeaderFault::BadIndefinite => (
                "indefinite length not allowed for this type".into(),
                consumed,
            ),
            HeaderFault::LengthExceeds {
                declared,
                remaining,
            } => (
                format!("declared length {declared} exceeds remaining {remaining} byte(s)"),
                consumed,
            ),
            HeaderFault::CountExceeds {
                declared,
                remaining,
            } => (
                format!("declared item count {declared} exceeds remaining {remaining} byte(s)"),
                consumed,
            ),
        }
    }
}
