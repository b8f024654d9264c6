//! # protodissect — Bounds-Checked Binary Message Dissection
//!
//! A decoding engine for length-prefixed binary formats: a bounds-checked
//! cursor, fixed-width field decoders, a TLV walker, and an element-tree
//! builder, plus two built-in grammars (CBOR and a sensor report format)
//! wired through them.
//!
//! ## Pipeline
//!
//! - **Cursor**: [`ByteCursor`] window over a message, every read bounds
//!   checked against the window
//! - **Fields**: fixed-width integers/floats, masked subfields, enums,
//!   length-prefixed and NUL-padded strings
//! - **TLV**: [`TlvWalker`] iterates type/length/value items over a cursor
//!   region, validating declared lengths at one chokepoint
//! - **Tree**: [`Element`] nodes with absolute byte ranges, assembled via
//!   [`ElementBuilder`] or a [`GrammarTable`] dispatch loop
//! - **Diagnostics**: malformed input annotates the tree instead of
//!   aborting the decode; only unreadable framing returns an error
//!
//! ## Grammars
//!
//! A grammar is a plain function from cursor to tree (see
//! [`grammar::decode`]); per-type decoders register in a [`GrammarTable`].
//! `cbor` decodes RFC 8949 items, `report` decodes a fixed-header sensor
//! report with nested TLV records.
//!
//! ## Usage
//!
//! See `tests/integration.rs` for end-to-end examples and
//! `src/bin/dissect_pcap.rs` for batch decoding out of capture files.

pub mod cbor;
pub mod cursor;
pub mod diag;
pub mod dump;
pub mod field;
pub mod frame;
pub mod grammar;
pub mod report;
pub mod tlv;
pub mod tree;

pub use cursor::{ByteCursor, ByteRange, DecodeError, Endianness};
pub use diag::{Diagnostic, Diagnostics, Severity};
pub use dump::tree_to_text;
pub use field::{FieldSpec, FieldWidth, FloatWidth, Mask, NulPolicy};
pub use frame::{decode_batch, BatchDecodeResult, DecodedMessage, SkippedRegion};
pub use grammar::{GrammarContext, GrammarTable, Limits};
pub use tlv::{LengthKind, TlvHeader, TlvProfile, TlvWalker};
pub use tree::{Element, ElementBuilder, ElementKind, ElementTree, Value};
