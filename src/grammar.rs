//! Grammar contract and per-decode context.
//!
//! A protocol grammar is a plain function from a cursor and a
//! [`GrammarContext`] to a root [`Element`]; [`decode`] is the top-level
//! entry that runs one and packages the result as an [`ElementTree`] plus
//! the number of bytes consumed. The context threads everything a grammar
//! needs during a single decode through one `&mut`: hardening limits,
//! the diagnostics sink, and a scratch map for cross-field state (a length
//! or type decoded early that gates how a later section is read).
//!
//! [`GrammarTable`] maps TLV type tags to decode functions, replacing the
//! per-type switch with a lookup done once per iteration; tags without an
//! entry fall back to a raw-bytes element and a `Warn`.

use std::collections::HashMap;

use crate::cursor::{ByteCursor, ByteRange, DecodeError};
use crate::diag::{Diagnostics, Severity};
use crate::tlv::{TlvHeader, TlvProfile, TlvWalker};
use crate::tree::{Element, ElementTree};

/// Per-decode hardening limits. Both bound attacker-driven work: nesting
/// depth for recursive sub-TLVs, element count for huge declared repeats.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_depth: usize,
    pub max_elements: usize,
}

impl Limits {
    pub fn new(max_depth: usize, max_elements: usize) -> Self {
        Limits {
            max_depth,
            max_elements,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_depth: 64,
            max_elements: 100_000,
        }
    }
}

/// Entry point of a protocol grammar. `Err` is reserved for unreadable
/// framing; every recoverable problem goes into the context's diagnostics
/// and decoding carries on.
pub type GrammarFn = fn(&mut ByteCursor<'_>, &mut GrammarContext) -> Result<Element, DecodeError>;

/// Decode function for one TLV type tag. Receives a cursor bounded to
/// exactly the declared value region.
pub type TagDecodeFn =
    fn(&mut ByteCursor<'_>, &TlvHeader, &mut GrammarContext) -> Result<Element, DecodeError>;

/// Mutable state for one decode call. Nothing here outlives the call, so
/// repeated decodes of the same buffer cannot influence each other.
#[derive(Debug)]
pub struct GrammarContext {
    limits: Limits,
    depth: usize,
    elements: usize,
    budget_reported: bool,
    diags: Diagnostics,
    scratch: HashMap<String, u64>,
}

impl GrammarContext {
    pub fn new(limits: Limits) -> Self {
        GrammarContext {
            limits,
            depth: 0,
            elements: 0,
            budget_reported: false,
            diags: Diagnostics::new(),
            scratch: HashMap::new(),
        }
    }

    pub fn diagnostics(&mut self) -> &mut Diagnostics {
        &mut self.diags
    }

    pub fn warn(&mut self, message: impl Into<String>, range: Option<ByteRange>) {
        self.diags.warn(message, range);
    }

    pub fn error(&mut self, message: impl Into<String>, range: Option<ByteRange>) {
        self.diags.error(message, range);
    }

    pub fn malformed(&mut self, message: impl Into<String>, range: Option<ByteRange>) {
        self.diags.malformed(message, range);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Enter a nested container. At the depth limit this reports an `Error`
    /// and returns false; the caller must leave the subtree undecoded
    /// instead of recursing.
    pub fn descend(&mut self, range: ByteRange) -> bool {
        if self.depth >= self.limits.max_depth {
            self.diags.error(
                format!("nesting depth limit ({}) reached", self.limits.max_depth),
                Some(range),
            );
            return false;
        }
        self.depth += 1;
        true
    }

    pub fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Account for one element about to be created. Once the budget is
    /// spent this reports a single `Error` and keeps returning false; loops
    /// driven by declared counts must stop producing elements then.
    pub fn count_element(&mut self, range: ByteRange) -> bool {
        if self.elements >= self.limits.max_elements {
            if !self.budget_reported {
                self.budget_reported = true;
                self.diags.error(
                    format!("element budget ({}) exhausted", self.limits.max_elements),
                    Some(range),
                );
            }
            return false;
        }
        self.elements += 1;
        true
    }

    /// True once the element budget ran out. Lets container loops tell a
    /// budget stop apart from genuine truncation.
    pub fn budget_spent(&self) -> bool {
        self.budget_reported
    }

    /// Stash a decoded value other fields need later in the same decode.
    pub fn set_field(&mut self, name: impl Into<String>, value: u64) {
        self.scratch.insert(name.into(), value);
    }

    pub fn field(&self, name: &str) -> Option<u64> {
        self.scratch.get(name).copied()
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diags
    }
}

/// Tag-indexed dispatch table for one TLV catalog.
#[derive(Default)]
pub struct GrammarTable {
    entries: Vec<(u64, &'static str, TagDecodeFn)>,
}

impl GrammarTable {
    pub fn new() -> Self {
        GrammarTable::default()
    }

    pub fn register(&mut self, tag: u64, name: &'static str, decode: TagDecodeFn) -> &mut Self {
        self.entries.push((tag, name, decode));
        self
    }

    pub fn lookup(&self, tag: u64) -> Option<(&'static str, TagDecodeFn)> {
        self.entries
            .iter()
            .find(|(t, _, _)| *t == tag)
            .map(|(_, name, f)| (*name, *f))
    }

    /// Walk a TLV region, dispatching each value through the table.
    ///
    /// Unknown tags become raw-bytes elements with a `Warn`; a value its
    /// decode function cannot finish becomes a `Malformed` plus the raw
    /// bytes, and the walk resynchronizes at the declared end. Elements
    /// cover header plus value. `pad_to` > 1 aligns between entries.
    pub fn decode_region(
        &self,
        cur: &mut ByteCursor<'_>,
        profile: TlvProfile,
        pad_to: usize,
        ctx: &mut GrammarContext,
    ) -> Vec<Element> {
        let mut out = Vec::new();
        let mut walker = TlvWalker::new(cur, profile);
        loop {
            let header = match walker.next(ctx.diagnostics()) {
                Some(h) => h,
                None => break,
            };
            let value_len = match header.declared_len {
                Some(n) => n,
                None => {
                    ctx.malformed(
                        "indefinite length not supported in this region",
                        Some(header.header_range),
                    );
                    break;
                }
            };
            if !ctx.count_element(header.header_range) {
                break;
            }
            let full_range = ByteRange::new(
                header.header_range.start,
                header.header_range.len + value_len,
            );
            let mut value = match walker.value_cursor(&header) {
                Ok(v) => v,
                Err(_) => break,
            };
            match self.lookup(header.type_tag) {
                Some((name, decode)) => match decode(&mut value, &header, ctx) {
                    Ok(mut elem) => {
                        if !value.is_empty() {
                            ctx.warn(
                                format!(
                                    "`{name}`: declared length {value_len}, decoded {}",
                                    value_len - value.remaining()
                                ),
                                Some(value.region()),
                            );
                        }
                        elem.range = full_range;
                        out.push(elem);
                    }
                    Err(err) => {
                        ctx.malformed(
                            format!("`{name}` value undecodable: {err}"),
                            Some(value.region()),
                        );
                        out.push(Element::opaque(name, full_range, value.region_bytes()));
                    }
                },
                None => {
                    ctx.warn(
                        format!("unknown TLV type {} ({value_len} byte(s))", header.type_tag),
                        Some(header.header_range),
                    );
                    out.push(
                        Element::opaque("unknown", full_range, value.region_bytes())
                            .with_display(format!("Unknown ({})", header.type_tag)),
                    );
                }
            }
            walker.skip_padding(pad_to);
        }
        out
    }
}

/// Run a grammar over a message buffer. On success the tree plus the number
/// of bytes consumed is returned; an `Err` means not even the message
/// framing was readable and no partial tree exists.
pub fn decode(
    buf: &[u8],
    grammar: GrammarFn,
    limits: Limits,
) -> Result<(ElementTree, usize), DecodeError> {
    let mut cur = ByteCursor::new(buf);
    let mut ctx = GrammarContext::new(limits);
    let root = grammar(&mut cur, &mut ctx)?;
    let consumed = cur.position();
    Ok((ElementTree::new(root, ctx.into_diagnostics()), consumed))
}

/// True when any diagnostic at `Malformed` or above was recorded.
pub fn has_structural_findings(diags: &Diagnostics) -> bool {
    diags.worst().is_some_and(|s| s >= Severity::Malformed)
}
