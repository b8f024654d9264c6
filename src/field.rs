//! Field decode primitives.
//!
//! Stateless functions that consume bytes from a [`ByteCursor`] and produce
//! one [`Element`] each, configured by a [`FieldSpec`] (name, endianness,
//! optional bit mask). Grammars compose these; none of them touches global
//! state and none of them panics on bad input: a read past the region end
//! surfaces as [`DecodeError::OutOfBounds`] for the caller to downgrade.
//!
//! Enumerated fields resolve display labels through a caller-supplied
//! `&[(value, label)]` table; a missing entry falls back to
//! `"Unknown (<value>)"` and is never an error.

use crate::cursor::{ByteCursor, DecodeError, Endianness};
use crate::tree::{Element, ElementKind, Value};

/// Byte width of an integer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
    W1,
    W2,
    W3,
    W4,
    W8,
}

impl FieldWidth {
    pub fn bytes(self) -> usize {
        match self {
            FieldWidth::W1 => 1,
            FieldWidth::W2 => 2,
            FieldWidth::W3 => 3,
            FieldWidth::W4 => 4,
            FieldWidth::W8 => 8,
        }
    }

    /// Read an unsigned integer of this width.
    pub fn read_uint(self, cur: &mut ByteCursor, endian: Endianness) -> Result<u64, DecodeError> {
        Ok(match self {
            FieldWidth::W1 => u64::from(cur.read_u8()?),
            FieldWidth::W2 => u64::from(cur.read_u16(endian)?),
            FieldWidth::W3 => u64::from(cur.read_u24(endian)?),
            FieldWidth::W4 => u64::from(cur.read_u32(endian)?),
            FieldWidth::W8 => cur.read_u64(endian)?,
        })
    }

    /// Read a two's-complement integer of this width, sign-extended to i64.
    pub fn read_int(self, cur: &mut ByteCursor, endian: Endianness) -> Result<i64, DecodeError> {
        Ok(match self {
            FieldWidth::W1 => i64::from(cur.read_i8()?),
            FieldWidth::W2 => i64::from(cur.read_i16(endian)?),
            FieldWidth::W3 => {
                let v = cur.read_u24(endian)?;
                i64::from(((v << 8) as i32) >> 8)
            }
            FieldWidth::W4 => i64::from(cur.read_i32(endian)?),
            FieldWidth::W8 => cur.read_i64(endian)?,
        })
    }
}

/// Storage width of a float field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatWidth {
    /// IEEE-754 half precision, widened to f64 on read.
    F16,
    F32,
    F64,
}

/// Bit mask and right shift extracting a packed sub-field from a wider raw
/// integer. `0xB4` under mask `0xF8`, shift 3 yields `0b10110` (22).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mask {
    pub bits: u64,
    pub shift: u32,
}

impl Mask {
    pub fn new(bits: u64, shift: u32) -> Self {
        Mask { bits, shift }
    }

    pub fn apply(&self, raw: u64) -> u64 {
        (raw & self.bits) >> self.shift
    }
}

/// Treatment of NUL bytes in fixed-length text fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NulPolicy {
    /// Drop trailing NUL padding before interpreting the text.
    StripTrailing,
    /// Keep every byte, NULs included.
    Keep,
}

/// Per-field configuration shared by all decode primitives.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub endian: Endianness,
    pub mask: Option<Mask>,
}

impl FieldSpec {
    pub fn new(name: &'static str, endian: Endianness) -> Self {
        FieldSpec {
            name,
            endian,
            mask: None,
        }
    }

    pub fn with_mask(mut self, bits: u64, shift: u32) -> Self {
        self.mask = Some(Mask::new(bits, shift));
        self
    }

    /// Logical value after applying the mask, if any.
    fn logical(&self, raw: u64) -> u64 {
        match &self.mask {
            Some(m) => m.apply(raw),
            None => raw,
        }
    }
}

/// Resolve an enum label from a `(value, label)` table.
pub fn label_for(labels: &[(u64, &'static str)], value: u64) -> Option<&'static str> {
    labels.iter().find(|(v, _)| *v == value).map(|(_, s)| *s)
}

pub fn decode_uint(
    cur: &mut ByteCursor,
    spec: &FieldSpec,
    width: FieldWidth,
) -> Result<Element, DecodeError> {
    let start = cur.position();
    let raw = width.read_uint(cur, spec.endian)?;
    Ok(Element::leaf(
        spec.name,
        ElementKind::Uint,
        cur.range_from(start),
        Value::U64(spec.logical(raw)),
    ))
}

pub fn decode_int(
    cur: &mut ByteCursor,
    spec: &FieldSpec,
    width: FieldWidth,
) -> Result<Element, DecodeError> {
    let start = cur.position();
    // A masked field extracts from the raw unsigned pattern, so the mask
    // path goes through read_uint and reinterprets afterwards.
    let value = match &spec.mask {
        Some(m) => {
            let raw = width.read_uint(cur, spec.endian)?;
            m.apply(raw) as i64
        }
        None => width.read_int(cur, spec.endian)?,
    };
    Ok(Element::leaf(
        spec.name,
        ElementKind::Int,
        cur.range_from(start),
        Value::I64(value),
    ))
}

pub fn decode_float(
    cur: &mut ByteCursor,
    spec: &FieldSpec,
    width: FloatWidth,
) -> Result<Element, DecodeError> {
    let start = cur.position();
    let value = match width {
        FloatWidth::F16 => cur.read_f16(spec.endian)?,
        FloatWidth::F32 => f64::from(cur.read_f32(spec.endian)?),
        FloatWidth::F64 => cur.read_f64(spec.endian)?,
    };
    Ok(Element::leaf(
        spec.name,
        ElementKind::Float,
        cur.range_from(start),
        Value::F64(value),
    ))
}

/// One byte, nonzero is true. With a mask set, the masked bits decide.
pub fn decode_bool(cur: &mut ByteCursor, spec: &FieldSpec) -> Result<Element, DecodeError> {
    let start = cur.position();
    let raw = u64::from(cur.read_u8()?);
    Ok(Element::leaf(
        spec.name,
        ElementKind::Bool,
        cur.range_from(start),
        Value::Bool(spec.logical(raw) != 0),
    ))
}

pub fn decode_fixed_bytes(
    cur: &mut ByteCursor,
    spec: &FieldSpec,
    len: usize,
) -> Result<Element, DecodeError> {
    let start = cur.position();
    let bytes = cur.read_bytes(len)?;
    Ok(Element::leaf(
        spec.name,
        ElementKind::Bytes,
        cur.range_from(start),
        Value::Bytes(bytes.to_vec()),
    ))
}

/// Exactly `len` bytes interpreted as UTF-8 text. Invalid sequences are
/// replaced, never rejected; NUL handling follows `nul`.
pub fn decode_fixed_text(
    cur: &mut ByteCursor,
    spec: &FieldSpec,
    len: usize,
    nul: NulPolicy,
) -> Result<Element, DecodeError> {
    let start = cur.position();
    let mut bytes = cur.read_bytes(len)?;
    if nul == NulPolicy::StripTrailing {
        while let [head @ .., 0] = bytes {
            bytes = head;
        }
    }
    Ok(Element::leaf(
        spec.name,
        ElementKind::Text,
        cur.range_from(start),
        Value::Text(String::from_utf8_lossy(bytes).into_owned()),
    ))
}

/// Length prefix of `len_width` bytes, then that many bytes of UTF-8 text.
/// The element's range covers prefix and payload.
pub fn decode_prefixed_text(
    cur: &mut ByteCursor,
    spec: &FieldSpec,
    len_width: FieldWidth,
) -> Result<Element, DecodeError> {
    let start = cur.position();
    let len = len_width.read_uint(cur, spec.endian)?;
    // Compared as u64 so a 64-bit prefix cannot truncate on 32-bit hosts.
    if len > cur.remaining() as u64 {
        return Err(DecodeError::OutOfBounds {
            at: cur.position(),
            wanted: usize::try_from(len).unwrap_or(usize::MAX),
            end: cur.position() + cur.remaining(),
        });
    }
    let bytes = cur.read_bytes(len as usize)?;
    Ok(Element::leaf(
        spec.name,
        ElementKind::Text,
        cur.range_from(start),
        Value::Text(String::from_utf8_lossy(bytes).into_owned()),
    ))
}

/// Length prefix of `len_width` bytes, then that many raw bytes.
pub fn decode_prefixed_bytes(
    cur: &mut ByteCursor,
    spec: &FieldSpec,
    len_width: FieldWidth,
) -> Result<Element, DecodeError> {
    let start = cur.position();
    let len = len_width.read_uint(cur, spec.endian)?;
    if len > cur.remaining() as u64 {
        return Err(DecodeError::OutOfBounds {
            at: cur.position(),
            wanted: usize::try_from(len).unwrap_or(usize::MAX),
            end: cur.position() + cur.remaining(),
        });
    }
    let bytes = cur.read_bytes(len as usize)?;
    Ok(Element::leaf(
        spec.name,
        ElementKind::Bytes,
        cur.range_from(start),
        Value::Bytes(bytes.to_vec()),
    ))
}

/// Integer field resolved against a label table. Unknown values keep the
/// raw integer and display as `"Unknown (<value>)"`; that is expected input,
/// not a decode problem.
pub fn decode_enum(
    cur: &mut ByteCursor,
    spec: &FieldSpec,
    width: FieldWidth,
    labels: &[(u64, &'static str)],
) -> Result<Element, DecodeError> {
    let start = cur.position();
    let raw = width.read_uint(cur, spec.endian)?;
    let value = spec.logical(raw);
    let display = match label_for(labels, value) {
        Some(label) => format!("{label} ({value})"),
        None => format!("Unknown ({value})"),
    };
    Ok(Element::leaf(
        spec.name,
        ElementKind::Uint,
        cur.range_from(start),
        Value::U64(value),
    )
    .with_display(display))
}

/// Pure formatter turning raw (already masked) bits into display text.
/// Formatters own their sentinel values; see [`format_latitude`] and
/// [`format_reltime`].
pub type FormatFn = fn(u64) -> String;

/// Integer field rendered through a custom formatter.
pub fn decode_formatted(
    cur: &mut ByteCursor,
    spec: &FieldSpec,
    width: FieldWidth,
    format: FormatFn,
) -> Result<Element, DecodeError> {
    let start = cur.position();
    let raw = width.read_uint(cur, spec.endian)?;
    let value = spec.logical(raw);
    Ok(Element::leaf(
        spec.name,
        ElementKind::Uint,
        cur.range_from(start),
        Value::U64(value),
    )
    .with_display(format(value)))
}

/// 19-bit two's-complement latitude in units of 90/2^18 degrees. The most
/// negative pattern (0x40000) is the "no position" sentinel.
pub fn format_latitude(raw: u64) -> String {
    let v = (raw & 0x7ffff) as u32;
    if v == 0x40000 {
        return "No position".into();
    }
    let sv = ((v << 13) as i32) >> 13;
    format!("{:.5} deg", f64::from(sv) * 90.0 / 262144.0)
}

/// Sentinel for [`format_reltime`]: time not available.
pub const RELTIME_NA: u64 = 0xffff_ffff;

/// Seconds relative to the session epoch, `hh:mm:ss`. The all-ones 32-bit
/// pattern means "not available".
pub fn format_reltime(raw: u64) -> String {
    if raw == RELTIME_NA {
        return "Not available".into();
    }
    format!("{:02}:{:02}:{:02}", raw / 3600, (raw % 3600) / 60, raw % 60)
}
