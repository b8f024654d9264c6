//! Station report grammar.
//!
//! A compact telemetry format used by the capture tooling this crate grew
//! out of: a fixed 8-byte header followed by a TLV section of records,
//! each padded to a 4-byte boundary.
//!
//! ```text
//! offset  size  field
//! 0       2     magic 0x5250, big endian
//! 2       1     version (1 and 2 are known)
//! 3       1     flags: bit 7 urgent, bits 4-6 priority, bits 0-3 reserved
//! 4       2     record count, big endian
//! 6       2     section length in bytes, big endian
//! 8       ...   records: tag u16, length u16, value; 4-byte aligned
//! ```
//!
//! Record values carry their own layouts (fixed text, masked coordinates,
//! enums, relative timestamps, nested sensor readings with one-byte TLV
//! headers). The version byte gates how sensor temperatures are displayed,
//! which is why it is stashed in the context scratch before the section is
//! walked.

use crate::cursor::{ByteCursor, ByteRange, DecodeError, Endianness};
use crate::field::{
    decode_bool, decode_enum, decode_fixed_text, decode_formatted, decode_prefixed_text,
    decode_uint, format_latitude, format_reltime, FieldSpec, FieldWidth, NulPolicy,
};
use crate::grammar::{GrammarContext, GrammarTable};
use crate::tlv::{TlvHeader, TlvProfile};
use crate::tree::{Element, ElementBuilder, ElementKind, Value};

pub const MAGIC: u16 = 0x5250;
const HEADER_LEN: usize = 8;

pub const TAG_STATION: u64 = 0x0001;
pub const TAG_POSITION: u64 = 0x0002;
pub const TAG_STATUS: u64 = 0x0003;
pub const TAG_UPTIME: u64 = 0x0004;
pub const TAG_READINGS: u64 = 0x0005;
pub const TAG_NOTE: u64 = 0x0006;

pub const TAG_TEMPERATURE: u64 = 0x11;
pub const TAG_PRESSURE: u64 = 0x12;
pub const TAG_SENSOR_ID: u64 = 0x13;

const RECORD_PROFILE: TlvProfile = TlvProfile::Plain {
    tag_width: FieldWidth::W2,
    len_width: FieldWidth::W2,
    endian: Endianness::Big,
};

const READING_PROFILE: TlvProfile = TlvProfile::Plain {
    tag_width: FieldWidth::W1,
    len_width: FieldWidth::W1,
    endian: Endianness::Big,
};

const STATUS_LABELS: &[(u64, &str)] = &[(0, "Idle"), (1, "Active"), (2, "Fault")];
const FIX_LABELS: &[(u64, &str)] = &[(0, "No fix"), (1, "GPS"), (2, "Differential")];
const VERSION_LABELS: &[(u64, &str)] = &[(1, "v1"), (2, "v2")];

/// Decode one station report message.
pub fn decode_message(
    cur: &mut ByteCursor<'_>,
    ctx: &mut GrammarContext,
) -> Result<Element, DecodeError> {
    let start = cur.position();
    let magic = {
        let mut probe = *cur;
        probe.read_u16(Endianness::Big).map_err(|_| {
            DecodeError::Framing(format!("message shorter than the {HEADER_LEN}-byte header"))
        })?
    };
    if magic != MAGIC {
        return Err(DecodeError::Framing(format!(
            "bad magic 0x{magic:04x}, expected 0x{MAGIC:04x}"
        )));
    }
    if cur.remaining() < HEADER_LEN {
        return Err(DecodeError::Framing(format!(
            "message shorter than the {HEADER_LEN}-byte header"
        )));
    }

    let mut builder = ElementBuilder::new();
    builder.begin("report", ElementKind::Record, start);

    let magic_elem = decode_uint(cur, &FieldSpec::new("magic", Endianness::Big), FieldWidth::W2)?
        .with_display(format!("0x{magic:04x}"));
    builder.push(magic_elem, ctx.diagnostics());

    let version_elem = decode_enum(
        cur,
        &FieldSpec::new("version", Endianness::Big),
        FieldWidth::W1,
        VERSION_LABELS,
    )?;
    let version = version_elem.value.as_ref().and_then(Value::as_u64).unwrap_or(0);
    if version != 1 && version != 2 {
        ctx.warn(
            format!("unsupported report version {version}"),
            Some(version_elem.range),
        );
    }
    ctx.set_field("version", version);
    builder.push(version_elem, ctx.diagnostics());

    decode_flags(cur, ctx, &mut builder)?;

    let count_elem = decode_uint(
        cur,
        &FieldSpec::new("record-count", Endianness::Big),
        FieldWidth::W2,
    )?;
    let declared_count = count_elem.value.as_ref().and_then(Value::as_u64).unwrap_or(0);
    ctx.set_field("record-count", declared_count);
    builder.push(count_elem, ctx.diagnostics());

    let len_elem = decode_uint(
        cur,
        &FieldSpec::new("section-length", Endianness::Big),
        FieldWidth::W2,
    )?;
    let mut section_len = len_elem.value.as_ref().and_then(Value::as_u64).unwrap_or(0) as usize;
    if section_len > cur.remaining() {
        ctx.malformed(
            format!(
                "section length {section_len} exceeds remaining {} byte(s)",
                cur.remaining()
            ),
            Some(len_elem.range),
        );
        section_len = cur.remaining();
    }
    builder.push(len_elem, ctx.diagnostics());

    let mut section = cur.take_region(section_len)?;
    builder.begin("records", ElementKind::Sequence, section.region().start);
    let records = record_table().decode_region(&mut section, RECORD_PROFILE, 4, ctx);
    let decoded_count = records.len() as u64;
    for record in records {
        builder.push(record, ctx.diagnostics());
    }
    builder.finish(cur.position(), ctx.diagnostics());

    if decoded_count != declared_count {
        ctx.warn(
            format!("{declared_count} record(s) declared, {decoded_count} decoded"),
            Some(section.region()),
        );
    }

    builder.finish(cur.position(), ctx.diagnostics());
    builder
        .into_root()
        .ok_or_else(|| DecodeError::Framing("no decodable report".into()))
}

/// The flags byte splits into bit-sibling fields, each covering the same
/// raw byte.
fn decode_flags(
    cur: &mut ByteCursor<'_>,
    ctx: &mut GrammarContext,
    builder: &mut ElementBuilder,
) -> Result<(), DecodeError> {
    let start = cur.position();
    if let Some(raw) = cur.peek_u8() {
        if raw & 0x0f != 0 {
            ctx.warn(
                format!("reserved flag bits set (0x{:02x})", raw & 0x0f),
                Some(ByteRange::new(start, 1)),
            );
        }
    }
    builder.begin("flags", ElementKind::Record, start);
    let mut dup = *cur;
    builder.push(
        decode_bool(cur, &FieldSpec::new("urgent", Endianness::Big).with_mask(0x80, 7))?,
        ctx.diagnostics(),
    );
    builder.push(
        decode_uint(
            &mut dup,
            &FieldSpec::new("priority", Endianness::Big).with_mask(0x70, 4),
            FieldWidth::W1,
        )?,
        ctx.diagnostics(),
    );
    builder.finish(cur.position(), ctx.diagnostics());
    Ok(())
}

fn record_table() -> GrammarTable {
    let mut table = GrammarTable::new();
    table
        .register(TAG_STATION, "station", decode_station)
        .register(TAG_POSITION, "position", decode_position)
        .register(TAG_STATUS, "status", decode_status)
        .register(TAG_UPTIME, "uptime", decode_uptime)
        .register(TAG_READINGS, "readings", decode_readings)
        .register(TAG_NOTE, "note", decode_note);
    table
}

fn readings_table() -> GrammarTable {
    let mut table = GrammarTable::new();
    table
        .register(TAG_TEMPERATURE, "temperature", decode_temperature)
        .register(TAG_PRESSURE, "pressure", decode_pressure)
        .register(TAG_SENSOR_ID, "sensor-id", decode_sensor_id);
    table
}

fn decode_station(
    cur: &mut ByteCursor<'_>,
    _header: &TlvHeader,
    _ctx: &mut GrammarContext,
) -> Result<Element, DecodeError> {
    decode_fixed_text(
        cur,
        &FieldSpec::new("station", Endianness::Big),
        8,
        NulPolicy::StripTrailing,
    )
}

/// Four bytes of packed coordinate plus one byte of fix quality. The
/// latitude lives in the low 19 bits of the first word.
fn decode_position(
    cur: &mut ByteCursor<'_>,
    _header: &TlvHeader,
    _ctx: &mut GrammarContext,
) -> Result<Element, DecodeError> {
    let start = cur.position();
    let latitude = decode_formatted(
        cur,
        &FieldSpec::new("latitude", Endianness::Big).with_mask(0x0007_ffff, 0),
        FieldWidth::W4,
        format_latitude,
    )?;
    let fix = decode_enum(
        cur,
        &FieldSpec::new("fix-quality", Endianness::Big),
        FieldWidth::W1,
        FIX_LABELS,
    )?;
    let mut elem = Element::new("position", ElementKind::Record, cur.range_from(start));
    elem.children.push(latitude);
    elem.children.push(fix);
    Ok(elem)
}

fn decode_status(
    cur: &mut ByteCursor<'_>,
    _header: &TlvHeader,
    _ctx: &mut GrammarContext,
) -> Result<Element, DecodeError> {
    decode_enum(
        cur,
        &FieldSpec::new("status", Endianness::Big),
        FieldWidth::W1,
        STATUS_LABELS,
    )
}

fn decode_uptime(
    cur: &mut ByteCursor<'_>,
    _header: &TlvHeader,
    _ctx: &mut GrammarContext,
) -> Result<Element, DecodeError> {
    decode_formatted(
        cur,
        &FieldSpec::new("uptime", Endianness::Big),
        FieldWidth::W4,
        format_reltime,
    )
}

/// Nested sensor readings, one-byte TLV headers, no padding.
fn decode_readings(
    cur: &mut ByteCursor<'_>,
    header: &TlvHeader,
    ctx: &mut GrammarContext,
) -> Result<Element, DecodeError> {
    if !ctx.descend(header.header_range) {
        return Ok(
            Element::opaque("readings", cur.region(), cur.take_rest())
                .with_display("nesting too deep, left undecoded"),
        );
    }
    let start = cur.position();
    let children = readings_table().decode_region(cur, READING_PROFILE, 0, ctx);
    ctx.ascend();
    let mut elem = Element::new("readings", ElementKind::Sequence, cur.range_from(start));
    elem.children = children;
    Ok(elem)
}

fn decode_note(
    cur: &mut ByteCursor<'_>,
    _header: &TlvHeader,
    _ctx: &mut GrammarContext,
) -> Result<Element, DecodeError> {
    decode_prefixed_text(cur, &FieldSpec::new("note", Endianness::Big), FieldWidth::W1)
}

/// Signed 16-bit temperature. Version 2 stations report tenths of a degree.
fn decode_temperature(
    cur: &mut ByteCursor<'_>,
    _header: &TlvHeader,
    ctx: &mut GrammarContext,
) -> Result<Element, DecodeError> {
    let start = cur.position();
    let v = FieldWidth::W2.read_int(cur, Endianness::Big)?;
    let display = if ctx.field("version") == Some(2) {
        format!("{:.1} C", v as f64 / 10.0)
    } else {
        format!("{v} C")
    };
    Ok(
        Element::leaf("temperature", ElementKind::Int, cur.range_from(start), Value::I64(v))
            .with_display(display),
    )
}

fn decode_pressure(
    cur: &mut ByteCursor<'_>,
    _header: &TlvHeader,
    _ctx: &mut GrammarContext,
) -> Result<Element, DecodeError> {
    let elem = decode_uint(
        cur,
        &FieldSpec::new("pressure", Endianness::Big),
        FieldWidth::W3,
    )?;
    let display = match &elem.value {
        Some(Value::U64(v)) => format!("{v} Pa"),
        _ => String::new(),
    };
    Ok(elem.with_display(display))
}

fn decode_sensor_id(
    cur: &mut ByteCursor<'_>,
    _header: &TlvHeader,
    _ctx: &mut GrammarContext,
) -> Result<Element, DecodeError> {
    decode_fixed_text(
        cur,
        &FieldSpec::new("sensor-id", Endianness::Big),
        4,
        NulPolicy::Keep,
    )
}
