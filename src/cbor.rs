//! CBOR grammar (RFC 8949 subset).
//!
//! Decodes one data item per message through the packed TLV profile: the
//! leading byte's top three bits are the major type, the low five bits the
//! minor code. All eight major types are covered, including indefinite
//! arrays, maps and chunked strings terminated by the break byte, and the
//! half/single/double float encodings of major type 7.
//!
//! Containers recurse through the shared depth and element budgets; a
//! subtree past the depth limit is kept as raw bytes instead of decoded
//! children.

use crate::cursor::{half_to_f64, ByteCursor, ByteRange, DecodeError};
use crate::grammar::GrammarContext;
use crate::tlv::{LengthKind, TlvHeader, TlvProfile, TlvWalker};
use crate::tree::{Element, ElementBuilder, ElementKind, Value};

/// Terminator byte of indefinite-length containers.
pub const BREAK: u8 = 0xff;

const MAJOR_UINT: u64 = 0;
const MAJOR_NINT: u64 = 1;
const MAJOR_BYTES: u64 = 2;
const MAJOR_TEXT: u64 = 3;
const MAJOR_ARRAY: u64 = 4;
const MAJOR_MAP: u64 = 5;
const MAJOR_TAG: u64 = 6;

fn classify(major: u64) -> LengthKind {
    match major {
        MAJOR_BYTES | MAJOR_TEXT => LengthKind::Bytes,
        MAJOR_ARRAY | MAJOR_MAP => LengthKind::Items,
        _ => LengthKind::Inline,
    }
}

const PROFILE: TlvProfile = TlvProfile::Packed { classify };

/// Decode one CBOR data item as the message root. Trailing bytes are left
/// unconsumed for the caller (batch decoding reads the next item there).
pub fn decode_message(
    cur: &mut ByteCursor<'_>,
    ctx: &mut GrammarContext,
) -> Result<Element, DecodeError> {
    if cur.is_empty() {
        return Err(DecodeError::Framing("empty message".into()));
    }
    let mut builder = ElementBuilder::new();
    if !decode_item(cur, ctx, &mut builder, "item")? {
        // The leading header was present but undecodable; the walker has
        // already reported it. Hand back the raw message instead of nothing,
        // consuming the region so a batch does not re-read the same bytes.
        let _ = cur.take_rest();
        return Ok(Element::opaque("message", cur.region(), cur.region_bytes()));
    }
    builder
        .into_root()
        .ok_or_else(|| DecodeError::Framing("no decodable item".into()))
}

/// Read the next item header and decode it into the builder. False when no
/// header could be read (end of region, malformed header, spent budget).
fn decode_item(
    cur: &mut ByteCursor<'_>,
    ctx: &mut GrammarContext,
    builder: &mut ElementBuilder,
    name: &'static str,
) -> Result<bool, DecodeError> {
    let header = {
        let mut walker = TlvWalker::new(&mut *cur, PROFILE);
        walker.next(ctx.diagnostics())
    };
    match header {
        Some(h) => decode_from_header(cur, ctx, builder, &h, name),
        None => Ok(false),
    }
}

fn decode_from_header(
    cur: &mut ByteCursor<'_>,
    ctx: &mut GrammarContext,
    builder: &mut ElementBuilder,
    h: &TlvHeader,
    name: &'static str,
) -> Result<bool, DecodeError> {
    #[cfg(feature = "decode_profile")]
    let _guard = profile::ProfileGuard::new(major_label(h.type_tag));

    if !ctx.count_element(h.header_range) {
        return Ok(false);
    }
    // The walker rejects indefinite codes for inline majors; the container
    // arms check `is_indefinite` before using the argument.
    let arg = h.argument.unwrap_or(0);
    match h.type_tag {
        MAJOR_UINT => {
            builder.push(
                Element::leaf(name, ElementKind::Uint, h.header_range, Value::U64(arg)),
                ctx.diagnostics(),
            );
        }
        MAJOR_NINT => {
            let elem = if arg > i64::MAX as u64 {
                ctx.warn(
                    format!("negative integer -1-{arg} exceeds 64-bit signed range"),
                    Some(h.header_range),
                );
                Element::new(name, ElementKind::Int, h.header_range)
                    .with_display(format!("-{}", u128::from(arg) + 1))
            } else {
                Element::leaf(
                    name,
                    ElementKind::Int,
                    h.header_range,
                    Value::I64(-(arg as i64) - 1),
                )
            };
            builder.push(elem, ctx.diagnostics());
        }
        MAJOR_BYTES | MAJOR_TEXT => match h.declared_len {
            Some(n) => {
                let bytes = cur.read_bytes(n)?;
                let range = ByteRange::new(h.header_range.start, h.header_range.len + n);
                let elem = string_leaf(name, h.type_tag, range, bytes, ctx);
                builder.push(elem, ctx.diagnostics());
            }
            None => decode_chunked_string(cur, ctx, builder, h, name)?,
        },
        MAJOR_ARRAY => {
            if !ctx.descend(h.header_range) {
                push_depth_limited(cur, ctx, builder, h);
                return Ok(true);
            }
            builder.begin(name, ElementKind::Sequence, h.header_range.start);
            if h.is_indefinite() {
                decode_until_break(cur, ctx, builder)?;
            } else {
                for i in 0..arg {
                    if !decode_item(cur, ctx, builder, "item")? {
                        if !ctx.budget_spent() {
                            ctx.malformed(
                                format!("array truncated after {i} of {arg} item(s)"),
                                Some(ByteRange::new(cur.position(), 0)),
                            );
                        }
                        break;
                    }
                }
            }
            builder.finish(cur.position(), ctx.diagnostics());
            ctx.ascend();
        }
        MAJOR_MAP => {
            if !ctx.descend(h.header_range) {
                push_depth_limited(cur, ctx, builder, h);
                return Ok(true);
            }
            builder.begin(name, ElementKind::Record, h.header_range.start);
            if h.is_indefinite() {
                loop {
                    let key = {
                        let mut walker = TlvWalker::new(&mut *cur, PROFILE);
                        walker.next_until_terminator(ctx.diagnostics(), |b| b == BREAK)
                    };
                    match key {
                        Some(kh) => decode_entry_from_key(cur, ctx, builder, &kh)?,
                        None => break,
                    }
                    if ctx.budget_spent() {
                        break;
                    }
                }
            } else {
                for i in 0..arg {
                    let key = {
                        let mut walker = TlvWalker::new(&mut *cur, PROFILE);
                        walker.next(ctx.diagnostics())
                    };
                    match key {
                        Some(kh) => decode_entry_from_key(cur, ctx, builder, &kh)?,
                        None => {
                            if !ctx.budget_spent() {
                                ctx.malformed(
                                    format!("map truncated after {i} of {arg} entry(ies)"),
                                    Some(ByteRange::new(cur.position(), 0)),
                                );
                            }
                            break;
                        }
                    }
                    if ctx.budget_spent() {
                        break;
                    }
                }
            }
            builder.finish(cur.position(), ctx.diagnostics());
            ctx.ascend();
        }
        MAJOR_TAG => {
            if !ctx.descend(h.header_range) {
                push_depth_limited(cur, ctx, builder, h);
                return Ok(true);
            }
            builder.begin(name, ElementKind::Record, h.header_range.start);
            if ctx.count_element(h.header_range) {
                builder.push(
                    Element::leaf(
                        "tag-number",
                        ElementKind::Uint,
                        h.header_range,
                        Value::U64(arg),
                    ),
                    ctx.diagnostics(),
                );
            }
            if !decode_item(cur, ctx, builder, "content")? && !ctx.budget_spent() {
                ctx.malformed(
                    "tagged item has no content",
                    Some(ByteRange::new(cur.position(), 0)),
                );
            }
            builder.finish(cur.position(), ctx.diagnostics());
            ctx.ascend();
        }
        _ => {
            // Major 7: simple values and floats, told apart by the width
            // of the argument extension.
            let elem = match h.extension_len() {
                2 => Element::leaf(
                    name,
                    ElementKind::Float,
                    h.header_range,
                    Value::F64(half_to_f64(arg as u16)),
                ),
                4 => Element::leaf(
                    name,
                    ElementKind::Float,
                    h.header_range,
                    Value::F64(f64::from(f32::from_bits(arg as u32))),
                ),
                8 => Element::leaf(
                    name,
                    ElementKind::Float,
                    h.header_range,
                    Value::F64(f64::from_bits(arg)),
                ),
                w => {
                    if w == 1 && arg < 32 {
                        ctx.warn(
                            "reserved two-byte simple value encoding",
                            Some(h.header_range),
                        );
                    }
                    simple_leaf(name, h.header_range, arg)
                }
            };
            builder.push(elem, ctx.diagnostics());
        }
    }
    Ok(true)
}

fn simple_leaf(name: &'static str, range: ByteRange, code: u64) -> Element {
    match code {
        20 => Element::leaf(name, ElementKind::Bool, range, Value::Bool(false)),
        21 => Element::leaf(name, ElementKind::Bool, range, Value::Bool(true)),
        22 => Element::leaf(name, ElementKind::Uint, range, Value::U64(22)).with_display("null"),
        23 => {
            Element::leaf(name, ElementKind::Uint, range, Value::U64(23)).with_display("undefined")
        }
        other => Element::leaf(name, ElementKind::Uint, range, Value::U64(other))
            .with_display(format!("simple({other})")),
    }
}

fn string_leaf(
    name: &'static str,
    major: u64,
    range: ByteRange,
    bytes: &[u8],
    ctx: &mut GrammarContext,
) -> Element {
    if major == MAJOR_TEXT {
        let text = match std::str::from_utf8(bytes) {
            Ok(s) => s.to_owned(),
            Err(_) => {
                ctx.warn("text string is not valid UTF-8", Some(range));
                String::from_utf8_lossy(bytes).into_owned()
            }
        };
        Element::leaf(name, ElementKind::Text, range, Value::Text(text))
    } else {
        Element::leaf(name, ElementKind::Bytes, range, Value::Bytes(bytes.to_vec()))
    }
}

/// Chunked string: definite-length chunks of the same major type up to the
/// break byte.
fn decode_chunked_string(
    cur: &mut ByteCursor<'_>,
    ctx: &mut GrammarContext,
    builder: &mut ElementBuilder,
    h: &TlvHeader,
    name: &'static str,
) -> Result<(), DecodeError> {
    builder.begin(name, ElementKind::Sequence, h.header_range.start);
    {
        let mut walker = TlvWalker::new(&mut *cur, PROFILE);
        while let Some(ch) = walker.next_until_terminator(ctx.diagnostics(), |b| b == BREAK) {
            let chunk_len = match ch.declared_len {
                Some(n) if ch.type_tag == h.type_tag => n,
                _ => {
                    ctx.malformed(
                        "chunk of wrong type inside indefinite-length string",
                        Some(ch.header_range),
                    );
                    break;
                }
            };
            if !ctx.count_element(ch.header_range) {
                break;
            }
            let mut value = match walker.value_cursor(&ch) {
                Ok(v) => v,
                Err(_) => break,
            };
            let bytes = value.take_rest();
            let range = ByteRange::new(ch.header_range.start, ch.header_range.len + chunk_len);
            let elem = string_leaf("chunk", h.type_tag, range, bytes, ctx);
            builder.push(elem, ctx.diagnostics());
        }
    }
    builder.finish(cur.position(), ctx.diagnostics());
    Ok(())
}

/// Items of an indefinite-length array up to the break byte.
fn decode_until_break(
    cur: &mut ByteCursor<'_>,
    ctx: &mut GrammarContext,
    builder: &mut ElementBuilder,
) -> Result<(), DecodeError> {
    loop {
        let header = {
            let mut walker = TlvWalker::new(&mut *cur, PROFILE);
            walker.next_until_terminator(ctx.diagnostics(), |b| b == BREAK)
        };
        match header {
            Some(h) => {
                if !decode_from_header(cur, ctx, builder, &h, "item")? {
                    return Ok(());
                }
            }
            None => return Ok(()),
        }
    }
}

/// One key/value pair whose key header is already read. The entry itself
/// counts against the element budget, so huge declared maps cannot mass
/// produce empty entries.
fn decode_entry_from_key(
    cur: &mut ByteCursor<'_>,
    ctx: &mut GrammarContext,
    builder: &mut ElementBuilder,
    key_header: &TlvHeader,
) -> Result<(), DecodeError> {
    if !ctx.count_element(key_header.header_range) {
        return Ok(());
    }
    builder.begin("entry", ElementKind::Record, key_header.header_range.start);
    decode_from_header(cur, ctx, builder, key_header, "key")?;
    if !decode_item(cur, ctx, builder, "value")? && !ctx.budget_spent() {
        ctx.malformed(
            "map entry missing value",
            Some(ByteRange::new(cur.position(), 0)),
        );
    }
    builder.finish(cur.position(), ctx.diagnostics());
    Ok(())
}

/// Keep a too-deep subtree as raw bytes. Its extent cannot be known without
/// decoding, so the rest of the current region is consumed.
fn push_depth_limited(
    cur: &mut ByteCursor<'_>,
    ctx: &mut GrammarContext,
    builder: &mut ElementBuilder,
    h: &TlvHeader,
) {
    let bytes = cur.take_rest();
    let range = ByteRange::new(h.header_range.start, h.header_range.len + bytes.len());
    builder.push(
        Element::opaque("depth-limited", range, bytes)
            .with_display("nesting too deep, left undecoded"),
        ctx.diagnostics(),
    );
}

#[cfg(feature = "decode_profile")]
fn major_label(tag: u64) -> &'static str {
    match tag {
        0 => "uint",
        1 => "nint",
        2 => "bytes",
        3 => "text",
        4 => "array",
        5 => "map",
        6 => "tag",
        _ => "simple",
    }
}

/// Per-major-type decode timing, gated behind the `decode_profile` feature.
#[cfg(feature = "decode_profile")]
pub mod profile {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    thread_local! {
        static DECODE_PROFILE: RefCell<HashMap<&'static str, (u64, Duration)>> =
            RefCell::new(HashMap::new());
    }

    pub struct ProfileGuard {
        label: &'static str,
        start: Instant,
    }

    impl ProfileGuard {
        pub fn new(label: &'static str) -> Self {
            ProfileGuard {
                label,
                start: Instant::now(),
            }
        }
    }

    impl Drop for ProfileGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            DECODE_PROFILE.with(|p| {
                let mut p = p.borrow_mut();
                let entry = p.entry(self.label).or_insert((0, Duration::ZERO));
                entry.0 += 1;
                entry.1 += elapsed;
            });
        }
    }

    /// Drain accumulated timings, most expensive first.
    pub fn take() -> Vec<(&'static str, u64, Duration)> {
        DECODE_PROFILE.with(|p| {
            let mut rows: Vec<_> = p
                .borrow_mut()
                .drain()
                .map(|(label, (calls, total))| (label, calls, total))
                .collect();
            rows.sort_by(|a, b| b.2.cmp(&a.2));
            rows
        })
    }
}
