//! Robustness tests: truncations, bit flips and junk input must never
//! panic, never read out of bounds, and must decode the same way twice.

use protodissect::cbor;
use protodissect::grammar::{decode, has_structural_findings, Limits};
use protodissect::report;
use protodissect::tree::Element;

/// A CBOR map with nested array, text keys and a half float.
const CBOR_SAMPLE: &[u8] = &[
    0xa2, 0x61, 0x61, 0x83, 0x01, 0x02, 0x03, 0x61, 0x62, 0xf9, 0x3c, 0x00,
];

/// A minimal station report: header plus one status record.
fn report_sample() -> Vec<u8> {
    let mut msg = vec![0x52, 0x50, 0x01, 0x80, 0x00, 0x01, 0x00, 0x08];
    msg.extend_from_slice(&[0x00, 0x03, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00]);
    msg
}

fn range_end(e: &Element) -> usize {
    e.range.end()
}

/// Every element and diagnostic range must stay inside the decoded buffer.
fn assert_ranges_bounded(root: &Element, len: usize) {
    assert!(range_end(root) <= len, "{} ends past {len}", root.range);
    for child in &root.children {
        assert_ranges_bounded(child, len);
    }
}

#[test]
fn test_every_cbor_prefix_decodes_without_panic() {
    for cut in 0..=CBOR_SAMPLE.len() {
        let prefix = &CBOR_SAMPLE[..cut];
        match decode(prefix, cbor::decode_message, Limits::default()) {
            Ok((tree, consumed)) => {
                assert!(consumed <= cut, "cut {cut}: consumed {consumed}");
                assert_ranges_bounded(&tree.root, cut);
                for d in tree.diagnostics.iter() {
                    if let Some(r) = d.range {
                        assert!(r.end() <= cut, "cut {cut}: diagnostic range {r}");
                    }
                }
                // A cut-short message must say so, not decode silently.
                if cut < CBOR_SAMPLE.len() {
                    assert!(
                        has_structural_findings(&tree.diagnostics),
                        "cut {cut}: truncated decode reported nothing"
                    );
                }
            }
            Err(_) => assert_eq!(cut, 0, "only the empty prefix may fail framing"),
        }
    }
}

#[test]
fn test_every_report_prefix_decodes_without_panic() {
    let msg = report_sample();
    for cut in 0..=msg.len() {
        let prefix = &msg[..cut];
        match decode(prefix, report::decode_message, Limits::default()) {
            Ok((tree, consumed)) => {
                assert!(consumed <= cut);
                assert_ranges_bounded(&tree.root, cut);
                if cut < msg.len() {
                    assert!(
                        has_structural_findings(&tree.diagnostics),
                        "cut {cut}: truncated decode reported nothing"
                    );
                }
            }
            // Anything shorter than the fixed header has no framing.
            Err(_) => assert!(cut < 8, "cut {cut} should have framing"),
        }
    }
}

#[test]
fn test_cbor_byte_flips_never_panic_and_stay_deterministic() {
    for i in 0..CBOR_SAMPLE.len() {
        for flip in [0x00, 0xff, CBOR_SAMPLE[i] ^ 0x80] {
            let mut mutant = CBOR_SAMPLE.to_vec();
            mutant[i] = flip;
            let first = decode(&mutant, cbor::decode_message, Limits::default());
            let second = decode(&mutant, cbor::decode_message, Limits::default());
            match (first, second) {
                (Ok((t1, c1)), Ok((t2, c2))) => {
                    assert_eq!(c1, c2, "byte {i} flip {flip:#04x}");
                    assert_eq!(t1.root, t2.root, "byte {i} flip {flip:#04x}");
                    assert_eq!(t1.diagnostics.len(), t2.diagnostics.len());
                    assert_ranges_bounded(&t1.root, mutant.len());
                }
                (Err(_), Err(_)) => {}
                _ => panic!("byte {i} flip {flip:#04x}: decode not deterministic"),
            }
        }
    }
}

#[test]
fn test_report_byte_flips_never_panic() {
    let msg = report_sample();
    for i in 0..msg.len() {
        for flip in [0x00, 0xff, msg[i] ^ 0x80] {
            let mut mutant = msg.clone();
            mutant[i] = flip;
            if let Ok((tree, consumed)) =
                decode(&mutant, report::decode_message, Limits::default())
            {
                assert!(consumed <= mutant.len());
                assert_ranges_bounded(&tree.root, mutant.len());
            }
        }
    }
}

#[test]
fn test_junk_buffers_decode_without_panic() {
    // Deterministic xorshift so failures reproduce.
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };
    for _ in 0..200 {
        let len = (next() % 64) as usize;
        let buf: Vec<u8> = (0..len).map(|_| next() as u8).collect();
        if let Ok((tree, consumed)) = decode(&buf, cbor::decode_message, Limits::default()) {
            assert!(consumed <= buf.len());
            assert_ranges_bounded(&tree.root, buf.len());
        }
        if let Ok((tree, consumed)) = decode(&buf, report::decode_message, Limits::default()) {
            assert!(consumed <= buf.len());
            assert_ranges_bounded(&tree.root, buf.len());
        }
    }
}

#[test]
fn test_tight_limits_hold_for_junk_input() {
    // Whatever the input, the element count stays within the budget plus
    // the opaque fallback root.
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };
    let limits = Limits::new(3, 16);
    for _ in 0..100 {
        let len = (next() % 48) as usize;
        let buf: Vec<u8> = (0..len).map(|_| next() as u8).collect();
        if let Ok((tree, _)) = decode(&buf, cbor::decode_message, limits) {
            assert!(
                tree.element_count() <= 16 + 1,
                "{} elements from {len} byte(s)",
                tree.element_count()
            );
        }
    }
}
