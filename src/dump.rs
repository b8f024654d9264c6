//! Plain-text rendering of decoded trees (dump output, tree summaries).

use crate::tree::{Element, ElementTree};

/// Multi-line dump of a whole tree, one element per line, diagnostics
/// appended at the end.
pub fn tree_to_text(tree: &ElementTree) -> String {
    let mut lines = Vec::new();
    element_lines(&tree.root, 0, &mut lines);
    if !tree.diagnostics.is_empty() {
        lines.push(format!("{} diagnostic(s):", tree.diagnostics.len()));
        for d in tree.diagnostics.iter() {
            lines.push(format!("  {d}"));
        }
    }
    lines.join("\n")
}

/// One-line summary of a single element, range included.
pub fn element_summary(e: &Element) -> String {
    let text = e.display_text();
    if text.is_empty() {
        format!("{} [{}]", e.name, e.range)
    } else {
        format!("{} [{}]: {}", e.name, e.range, text)
    }
}

fn element_lines(e: &Element, indent: usize, out: &mut Vec<String>) {
    let pad = "  ".repeat(indent);
    out.push(format!("{pad}{}", element_summary(e)));
    for child in &e.children {
        element_lines(child, indent + 1, out);
    }
}
