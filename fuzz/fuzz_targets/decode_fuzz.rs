//! Decode fuzz target: feed arbitrary bytes to both built-in grammars.
//! Decoding must not panic; it returns a tree with diagnostics or a framing
//! error. The first byte steers limits and the batch transport skip so tight
//! budgets get fuzzed alongside the defaults.
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use protodissect::{cbor, decode_batch, grammar, report, tree_to_text, Limits};

    let (steer, body) = match data.split_first() {
        Some(x) => x,
        None => return,
    };
    let limits = if steer & 0x01 != 0 {
        Limits::new(4, 32)
    } else {
        Limits::default()
    };
    let skip = if steer & 0x02 != 0 { Some(3) } else { None };

    if let Ok((tree, consumed)) = grammar::decode(body, cbor::decode_message, limits) {
        assert!(consumed <= body.len());
        let _ = tree_to_text(&tree);
    }
    if let Ok((tree, consumed)) = grammar::decode(body, report::decode_message, limits) {
        assert!(consumed <= body.len());
        let _ = tree_to_text(&tree);
    }
    let _ = decode_batch(body, cbor::decode_message, limits, skip);
    let _ = decode_batch(body, report::decode_message, limits, skip);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
