//! CBOR grammar tests: RFC 8949 example encodings, indefinite-length forms,
//! and the depth/budget hardening paths.

use protodissect::cbor;
use protodissect::cursor::ByteRange;
use protodissect::diag::Severity;
use protodissect::frame::decode_batch;
use protodissect::grammar::{decode, has_structural_findings, Limits};
use protodissect::tree::{Element, ElementKind, ElementTree, Value};

fn decode_ok(bytes: &[u8]) -> (ElementTree, usize) {
    decode(bytes, cbor::decode_message, Limits::default()).expect("decode")
}

fn root_of(bytes: &[u8]) -> Element {
    let (tree, _) = decode_ok(bytes);
    tree.root
}

#[test]
fn test_text_string_covers_header_and_payload() {
    let (tree, consumed) = decode_ok(&[0x65, b'h', b'e', b'l', b'l', b'o']);
    assert_eq!(consumed, 6);
    assert!(tree.diagnostics.is_empty());
    let root = &tree.root;
    assert_eq!(root.kind, ElementKind::Text);
    assert_eq!(root.value, Some(Value::Text("hello".into())));
    // One header byte plus five payload bytes.
    assert_eq!(root.range, ByteRange::new(0, 6));
}

#[test]
fn test_unsigned_integers() {
    for (bytes, expected) in [
        (vec![0x00], 0u64),
        (vec![0x0a], 10),
        (vec![0x17], 23),
        (vec![0x18, 0x2a], 42),
        (vec![0x19, 0x03, 0xe8], 1000),
        (vec![0x1a, 0x00, 0x0f, 0x42, 0x40], 1_000_000),
        (
            vec![0x1b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff],
            u64::MAX,
        ),
    ] {
        let (tree, consumed) = decode_ok(&bytes);
        assert_eq!(consumed, bytes.len());
        assert_eq!(tree.root.value, Some(Value::U64(expected)), "{bytes:02x?}");
        assert_eq!(tree.root.range, ByteRange::new(0, bytes.len()));
    }
}

#[test]
fn test_negative_integers() {
    for (bytes, expected) in [
        (vec![0x20], -1i64),
        (vec![0x38, 0x63], -100),
        (vec![0x39, 0x03, 0xe7], -1000),
    ] {
        let root = root_of(&bytes);
        assert_eq!(root.value, Some(Value::I64(expected)), "{bytes:02x?}");
    }
    // Mixed-sign array: `as_i64` also accepts unsigned values that fit.
    let root = root_of(&[0x83, 0x01, 0x20, 0x39, 0x03, 0xe7]);
    let values: Vec<i64> = root
        .children
        .iter()
        .filter_map(|c| c.value.as_ref().and_then(Value::as_i64))
        .collect();
    assert_eq!(values, [1, -1, -1000]);
}

#[test]
fn test_negative_integer_beyond_i64_keeps_display() {
    let bytes = [0x3b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
    let (tree, _) = decode_ok(&bytes);
    assert_eq!(tree.root.value, None);
    assert_eq!(tree.root.display_text(), "-18446744073709551616");
    assert_eq!(tree.diagnostics.count(Severity::Warn), 1);
    assert!(tree
        .diagnostics
        .iter()
        .any(|d| d.message.contains("exceeds 64-bit signed range")));
}

#[test]
fn test_half_precision_floats() {
    for (bytes, expected) in [
        (vec![0xf9, 0x3c, 0x00], 1.0f64),
        (vec![0xf9, 0x7b, 0xff], 65504.0),
        (vec![0xf9, 0x00, 0x01], 5.960464477539063e-8),
        (vec![0xf9, 0x7c, 0x00], f64::INFINITY),
    ] {
        let root = root_of(&bytes);
        assert_eq!(root.kind, ElementKind::Float);
        assert_eq!(root.value, Some(Value::F64(expected)), "{bytes:02x?}");
        assert_eq!(root.range, ByteRange::new(0, 3));
    }
}

#[test]
fn test_half_precision_negative_zero_and_nan() {
    let root = root_of(&[0xf9, 0x80, 0x00]);
    let v = root.value.as_ref().and_then(Value::as_f64).expect("f64");
    assert_eq!(v, 0.0);
    assert!(v.is_sign_negative());

    let root = root_of(&[0xf9, 0x7e, 0x00]);
    let v = root.value.as_ref().and_then(Value::as_f64).expect("f64");
    assert!(v.is_nan());
}

#[test]
fn test_single_and_double_precision_floats() {
    let root = root_of(&[0xfa, 0x47, 0xc3, 0x50, 0x00]);
    assert_eq!(root.value, Some(Value::F64(100000.0)));
    assert_eq!(root.range, ByteRange::new(0, 5));

    let root = root_of(&[0xfb, 0x3f, 0xf1, 0x99, 0x99, 0x99, 0x99, 0x99, 0x9a]);
    assert_eq!(root.value, Some(Value::F64(1.1)));
    assert_eq!(root.range, ByteRange::new(0, 9));
}

#[test]
fn test_simple_values() {
    assert_eq!(root_of(&[0xf4]).value, Some(Value::Bool(false)));
    assert_eq!(root_of(&[0xf5]).value, Some(Value::Bool(true)));
    assert_eq!(root_of(&[0xf6]).display_text(), "null");
    assert_eq!(root_of(&[0xf7]).display_text(), "undefined");
    assert_eq!(root_of(&[0xf8, 0xff]).display_text(), "simple(255)");
    // Booleans extract through the accessor; null does not read as false.
    let root = root_of(&[0x82, 0xf5, 0xf6]);
    let flags: Vec<Option<bool>> = root
        .children
        .iter()
        .map(|c| c.value.as_ref().and_then(Value::as_bool))
        .collect();
    assert_eq!(flags, [Some(true), None]);
}

#[test]
fn test_reserved_two_byte_simple_encoding_warns() {
    // Simple values below 32 must use the one-byte form.
    let (tree, _) = decode_ok(&[0xf8, 0x10]);
    assert_eq!(tree.root.display_text(), "simple(16)");
    assert_eq!(tree.diagnostics.count(Severity::Warn), 1);
    assert!(!has_structural_findings(&tree.diagnostics));
}

#[test]
fn test_definite_array() {
    let (tree, consumed) = decode_ok(&[0x83, 0x01, 0x02, 0x03]);
    assert_eq!(consumed, 4);
    let root = &tree.root;
    assert_eq!(root.kind, ElementKind::Sequence);
    assert_eq!(root.range, ByteRange::new(0, 4));
    let values: Vec<u64> = root
        .children
        .iter()
        .filter_map(|c| c.value.as_ref().and_then(Value::as_u64))
        .collect();
    assert_eq!(values, [1, 2, 3]);
}

#[test]
fn test_nested_array() {
    let root = root_of(&[0x82, 0x01, 0x82, 0x02, 0x03]);
    assert_eq!(root.children.len(), 2);
    let inner = &root.children[1];
    assert_eq!(inner.kind, ElementKind::Sequence);
    assert_eq!(inner.range, ByteRange::new(2, 3));
    assert_eq!(inner.children.len(), 2);
}

#[test]
fn test_empty_containers() {
    let root = root_of(&[0x80]);
    assert_eq!(root.kind, ElementKind::Sequence);
    assert!(root.children.is_empty());
    let root = root_of(&[0xa0]);
    assert_eq!(root.kind, ElementKind::Record);
    assert!(root.children.is_empty());
}

#[test]
fn test_indefinite_array_consumes_the_break() {
    let (tree, consumed) = decode_ok(&[0x9f, 0x01, 0x02, 0xff]);
    assert_eq!(consumed, 4);
    assert!(tree.diagnostics.is_empty());
    assert_eq!(tree.root.children.len(), 2);
    // The break byte belongs to the container's range.
    assert_eq!(tree.root.range, ByteRange::new(0, 4));
}

#[test]
fn test_map_builds_key_value_entries() {
    let (tree, consumed) = decode_ok(&[0xa1, 0x61, 0x61, 0x01]);
    assert_eq!(consumed, 4);
    let root = &tree.root;
    assert_eq!(root.kind, ElementKind::Record);
    assert_eq!(root.children.len(), 1);
    let entry = &root.children[0];
    assert_eq!(entry.name, "entry");
    assert_eq!(entry.range, ByteRange::new(1, 3));
    assert_eq!(
        entry.find("key").expect("key").value,
        Some(Value::Text("a".into()))
    );
    assert_eq!(entry.find("value").expect("value").value, Some(Value::U64(1)));
}

#[test]
fn test_indefinite_map() {
    let (tree, consumed) = decode_ok(&[0xbf, 0x61, 0x61, 0x01, 0xff]);
    assert_eq!(consumed, 5);
    assert!(tree.diagnostics.is_empty());
    assert_eq!(tree.root.children.len(), 1);
}

#[test]
fn test_truncated_map_is_malformed() {
    let (tree, _) = decode_ok(&[0xa2, 0x01, 0x02]);
    assert_eq!(tree.root.children.len(), 1);
    assert!(tree
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Malformed
            && d.message.contains("map truncated after 1 of 2 entry(ies)")));
}

#[test]
fn test_truncated_array_is_malformed() {
    let (tree, consumed) = decode_ok(&[0x83, 0x01, 0x02]);
    assert_eq!(consumed, 3);
    assert_eq!(tree.root.children.len(), 2);
    assert!(tree
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Malformed
            && d.message.contains("array truncated after 2 of 3 item(s)")));
}

#[test]
fn test_tagged_item() {
    // Tag 1, epoch timestamp 1363896240 (an RFC 8949 example).
    let (tree, consumed) = decode_ok(&[0xc1, 0x1a, 0x51, 0x4b, 0x67, 0xb0]);
    assert_eq!(consumed, 6);
    let root = &tree.root;
    assert_eq!(root.kind, ElementKind::Record);
    assert_eq!(root.range, ByteRange::new(0, 6));
    assert_eq!(
        root.find("tag-number").expect("tag-number").value,
        Some(Value::U64(1))
    );
    assert_eq!(
        root.find("content").expect("content").value,
        Some(Value::U64(1_363_896_240))
    );
}

#[test]
fn test_byte_string() {
    let root = root_of(&[0x44, 0x01, 0x02, 0x03, 0x04]);
    assert_eq!(root.kind, ElementKind::Bytes);
    assert_eq!(root.value, Some(Value::Bytes(vec![1, 2, 3, 4])));
    assert_eq!(root.range, ByteRange::new(0, 5));
}

#[test]
fn test_invalid_utf8_text_warns_and_is_replaced() {
    let (tree, _) = decode_ok(&[0x62, 0xc3, 0x28]);
    assert_eq!(tree.diagnostics.count(Severity::Warn), 1);
    assert!(tree
        .diagnostics
        .iter()
        .any(|d| d.message.contains("not valid UTF-8")));
    assert_eq!(tree.root.value, Some(Value::Text("\u{fffd}(".into())));
    assert!(!has_structural_findings(&tree.diagnostics));
}

#[test]
fn test_chunked_text_string() {
    let (tree, consumed) = decode_ok(&[0x7f, 0x62, b'h', b'e', 0x63, b'l', b'l', b'o', 0xff]);
    assert_eq!(consumed, 9);
    assert!(tree.diagnostics.is_empty());
    let root = &tree.root;
    assert_eq!(root.kind, ElementKind::Sequence);
    assert_eq!(root.range, ByteRange::new(0, 9));
    let chunks: Vec<&str> = root
        .children
        .iter()
        .filter_map(|c| c.value.as_ref().and_then(Value::as_text))
        .collect();
    assert_eq!(chunks, ["he", "llo"]);
}

#[test]
fn test_chunked_byte_string() {
    let (tree, consumed) = decode_ok(&[0x5f, 0x41, 0x01, 0x42, 0x02, 0x03, 0xff]);
    assert_eq!(consumed, 7);
    let chunks: Vec<&[u8]> = tree
        .root
        .children
        .iter()
        .filter_map(|c| c.value.as_ref().and_then(Value::as_bytes))
        .collect();
    assert_eq!(chunks, [&[0x01][..], &[0x02, 0x03][..]]);
}

#[test]
fn test_wrong_chunk_type_in_indefinite_string() {
    // A byte-string chunk inside an indefinite text string.
    let (tree, _) = decode_ok(&[0x7f, 0x41, 0x61, 0xff]);
    assert!(tree
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Malformed
            && d.message.contains("chunk of wrong type")));
    assert!(tree.root.children.is_empty());
}

#[test]
fn test_unterminated_indefinite_array_is_malformed() {
    let (tree, _) = decode_ok(&[0x9f, 0x01, 0x02]);
    assert_eq!(tree.root.children.len(), 2);
    assert!(tree
        .diagnostics
        .iter()
        .any(|d| d.message.contains("indefinite container not terminated")));
}

#[test]
fn test_oversized_declared_length_yields_opaque_root() {
    // Byte string declaring 4096 bytes with two in the buffer.
    let bytes = [0x5a, 0x00, 0x00, 0x10, 0x00, 0xde, 0xad];
    let (tree, consumed) = decode(&bytes, cbor::decode_message, Limits::default()).expect("decode");
    // The whole region is consumed as one undecodable message.
    assert_eq!(consumed, bytes.len());
    assert_eq!(tree.root.name, "message");
    assert_eq!(tree.root.kind, ElementKind::Opaque);
    assert_eq!(tree.root.range, ByteRange::new(0, bytes.len()));

    assert_eq!(tree.diagnostics.len(), 1);
    let d = tree.diagnostics.iter().next().expect("diag");
    assert_eq!(d.severity, Severity::Malformed);
    assert_eq!(d.range, Some(ByteRange::new(0, 5)));
    assert!(
        d.message.contains("declared length 4096 exceeds remaining 2 byte(s)"),
        "{}",
        d.message
    );
    assert!(has_structural_findings(&tree.diagnostics));
}

#[test]
fn test_oversized_item_count_is_malformed() {
    // Array declaring 2^32-1 items with an empty tail; each item needs at
    // least one byte, so the count can never be satisfied.
    let bytes = [0x9b, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff];
    let (tree, _) = decode_ok(&bytes);
    assert_eq!(tree.diagnostics.count(Severity::Malformed), 1);
    assert!(tree
        .diagnostics
        .iter()
        .any(|d| d.message.contains("declared item count 4294967295")));
}

#[test]
fn test_reserved_minor_codes_are_malformed() {
    for lead in [0x1c, 0x1d, 0x1e] {
        let (tree, _) = decode_ok(&[lead]);
        assert_eq!(tree.root.kind, ElementKind::Opaque);
        assert_eq!(tree.diagnostics.count(Severity::Malformed), 1, "lead {lead:#x}");
        assert!(tree
            .diagnostics
            .iter()
            .any(|d| d.message.contains("reserved length code")));
    }
}

#[test]
fn test_stray_break_byte_is_malformed() {
    let (tree, _) = decode_ok(&[0xff]);
    assert_eq!(tree.root.kind, ElementKind::Opaque);
    assert!(tree
        .diagnostics
        .iter()
        .any(|d| d.message.contains("indefinite length not allowed")));
}

#[test]
fn test_empty_buffer_is_a_framing_error() {
    let err = decode(&[], cbor::decode_message, Limits::default()).unwrap_err();
    assert!(err.to_string().contains("empty message"));
}

#[test]
fn test_trailing_bytes_are_left_for_the_caller() {
    let (tree, consumed) = decode_ok(&[0x18, 0x2a, 0xde, 0xad]);
    assert_eq!(consumed, 2);
    assert_eq!(tree.root.value, Some(Value::U64(42)));
    assert!(tree.diagnostics.is_empty());
}

#[test]
fn test_batch_of_consecutive_items() {
    let payload = [0x01, 0x62, b'h', b'i', 0xf5];
    let res = decode_batch(&payload, cbor::decode_message, Limits::default(), None)
        .expect("batch");
    assert!(res.skipped.is_empty());
    assert_eq!(res.messages.len(), 3);
    assert_eq!(res.messages[0].byte_range, (0, 1));
    assert_eq!(res.messages[1].byte_range, (1, 4));
    assert_eq!(res.messages[2].byte_range, (4, 5));
}

#[test]
fn test_depth_limit_keeps_subtree_as_raw_bytes() {
    // Six nested arrays against a limit of four.
    let bytes = [0x81, 0x81, 0x81, 0x81, 0x81, 0x81, 0x01];
    let (tree, consumed) =
        decode(&bytes, cbor::decode_message, Limits::new(4, 1000)).expect("decode");
    assert_eq!(consumed, 7);
    assert_eq!(tree.diagnostics.len(), 1);
    let d = tree.diagnostics.iter().next().expect("diag");
    assert_eq!(d.severity, Severity::Error);
    assert!(d.message.contains("nesting depth limit (4) reached"));

    let mut node = &tree.root;
    for _ in 0..4 {
        assert_eq!(node.kind, ElementKind::Sequence);
        assert_eq!(node.children.len(), 1);
        node = &node.children[0];
    }
    assert_eq!(node.name, "depth-limited");
    assert_eq!(node.kind, ElementKind::Opaque);
    assert_eq!(node.display_text(), "nesting too deep, left undecoded");
    assert_eq!(node.range, ByteRange::new(4, 3));
}

#[test]
fn test_nesting_at_the_limit_decodes_clean() {
    let bytes = [0x81, 0x81, 0x81, 0x81, 0x01];
    let (tree, consumed) =
        decode(&bytes, cbor::decode_message, Limits::new(4, 1000)).expect("decode");
    assert_eq!(consumed, 5);
    assert!(tree.diagnostics.is_empty());
}

#[test]
fn test_element_budget_stops_huge_arrays() {
    let mut bytes = vec![0x98, 0x64];
    bytes.extend_from_slice(&[0x01; 100]);
    let (tree, _) = decode(&bytes, cbor::decode_message, Limits::new(64, 10)).expect("decode");
    // Budget of 10: the array itself plus nine items.
    assert_eq!(tree.root.children.len(), 9);
    assert_eq!(tree.diagnostics.len(), 1);
    let d = tree.diagnostics.iter().next().expect("diag");
    assert_eq!(d.severity, Severity::Error);
    assert!(d.message.contains("element budget (10) exhausted"));
}

#[test]
fn test_decoding_is_deterministic() {
    let bytes = [
        0xa2, 0x61, 0x61, 0x83, 0x01, 0x02, 0x03, 0x61, 0x62, 0xf9, 0x3c, 0x00,
    ];
    let (t1, c1) = decode_ok(&bytes);
    let (t2, c2) = decode_ok(&bytes);
    assert_eq!(c1, c2);
    assert_eq!(t1.root, t2.root);
    assert!(t1.diagnostics.iter().eq(t2.diagnostics.iter()));
}
