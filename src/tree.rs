//! Decoded element tree.
//!
//! A decode produces a tree of [`Element`]s mirroring the message structure:
//! leaves for primitive fields, containers for records and sequences, and
//! [`ElementKind::Opaque`] wrappers for bytes that were deliberately left
//! undecoded. Every element carries the absolute byte range it was decoded
//! from, so a viewer can map any node back to the original buffer.
//!
//! Containers are assembled through [`ElementBuilder`], which closes ranges
//! and checks that children stay inside their parent.

use crate::cursor::ByteRange;
use crate::diag::Diagnostics;

/// Decoded scalar payload of a leaf element.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Text(String),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            Value::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// Structural classification of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Uint,
    Int,
    Float,
    Bool,
    Bytes,
    Text,
    /// Ordered container of like elements.
    Sequence,
    /// Container of named fields.
    Record,
    /// Raw bytes kept undecoded (unknown type, limit hit, resync).
    Opaque,
}

/// One node of the decoded tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub kind: ElementKind,
    /// Bytes this element was decoded from, header included.
    pub range: ByteRange,
    pub value: Option<Value>,
    /// Formatter-provided text; when absent the value renders itself.
    pub display: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>, kind: ElementKind, range: ByteRange) -> Self {
        Element {
            name: name.into(),
            kind,
            range,
            value: None,
            display: None,
            children: Vec::new(),
        }
    }

    pub fn leaf(name: impl Into<String>, kind: ElementKind, range: ByteRange, value: Value) -> Self {
        let mut e = Element::new(name, kind, range);
        e.value = Some(value);
        e
    }

    /// Raw-bytes element for regions kept undecoded.
    pub fn opaque(name: impl Into<String>, range: ByteRange, bytes: &[u8]) -> Self {
        Element::leaf(name, ElementKind::Opaque, range, Value::Bytes(bytes.to_vec()))
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// First direct child with the given name.
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Elements in this subtree, itself included.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Element::subtree_len).sum::<usize>()
    }

    /// Human-readable value text: the formatter override when present,
    /// otherwise a default rendering of the value.
    pub fn display_text(&self) -> String {
        if let Some(d) = &self.display {
            return d.clone();
        }
        match &self.value {
            Some(Value::U64(v)) => v.to_string(),
            Some(Value::I64(v)) => v.to_string(),
            Some(Value::F64(v)) => v.to_string(),
            Some(Value::Bool(v)) => v.to_string(),
            Some(Value::Text(v)) => format!("\"{v}\""),
            Some(Value::Bytes(v)) => preview_bytes(v),
            None => match self.kind {
                ElementKind::Sequence => format!("{} item(s)", self.children.len()),
                ElementKind::Record => format!("{} field(s)", self.children.len()),
                _ => String::new(),
            },
        }
    }
}

/// Hex preview capped at 16 bytes so one oversized blob does not flood a
/// summary line.
fn preview_bytes(bytes: &[u8]) -> String {
    let shown: Vec<String> = bytes.iter().take(16).map(|b| format!("{b:02x}")).collect();
    if bytes.len() > 16 {
        format!("{} .. ({} bytes)", shown.join(" "), bytes.len())
    } else {
        shown.join(" ")
    }
}

/// Stack of open containers. `begin` opens one at a header offset, `push`
/// attaches completed elements to the innermost open container, `finish`
/// closes the innermost one at an end offset and attaches it one level up.
///
/// When no container is open, `push` installs the element as the root;
/// [`ElementBuilder::into_root`] hands it back once building is done.
#[derive(Debug, Default)]
pub struct ElementBuilder {
    stack: Vec<Element>,
    root: Option<Element>,
}

impl ElementBuilder {
    pub fn new() -> Self {
        ElementBuilder::default()
    }

    /// Number of currently open containers.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Open a container whose bytes start at absolute offset `start`.
    pub fn begin(&mut self, name: impl Into<String>, kind: ElementKind, start: usize) {
        self.stack
            .push(Element::new(name, kind, ByteRange::new(start, 0)));
    }

    /// Attach a completed element.
    pub fn push(&mut self, child: Element, diags: &mut Diagnostics) {
        match self.stack.last_mut() {
            Some(top) => top.children.push(child),
            None => {
                if let Some(root) = &mut self.root {
                    diags.error(
                        format!("element `{}` pushed after the root was closed", child.name),
                        Some(child.range),
                    );
                    root.children.push(child);
                } else {
                    self.root = Some(child);
                }
            }
        }
    }

    /// Close the innermost open container at absolute offset `end`. Children
    /// whose range escapes the closed container are reported as `Error`.
    pub fn finish(&mut self, end: usize, diags: &mut Diagnostics) {
        let mut elem = match self.stack.pop() {
            Some(e) => e,
            None => return,
        };
        elem.range = ByteRange::new(elem.range.start, end.saturating_sub(elem.range.start));
        for child in &elem.children {
            if !elem.range.contains(&child.range) {
                diags.error(
                    format!(
                        "child `{}` at {} escapes container `{}` at {}",
                        child.name, child.range, elem.name, elem.range
                    ),
                    Some(child.range),
                );
            }
        }
        self.push(elem, diags);
    }

    /// The finished root, if exactly the balanced begin/finish sequence was
    /// driven to completion.
    pub fn into_root(self) -> Option<Element> {
        if self.stack.is_empty() {
            self.root
        } else {
            None
        }
    }
}

/// Result of decoding one message: the root element plus every diagnostic
/// reported along the way.
#[derive(Debug, Clone)]
pub struct ElementTree {
    pub root: Element,
    pub diagnostics: Diagnostics,
}

impl ElementTree {
    pub fn new(root: Element, diagnostics: Diagnostics) -> Self {
        ElementTree { root, diagnostics }
    }

    /// Total number of elements in the tree.
    pub fn element_count(&self) -> usize {
        self.root.subtree_len()
    }
}
