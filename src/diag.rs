//! Decode diagnostics.
//!
//! Malformed input is an expected condition, not a failure: problems found
//! while walking a message are collected as [`Diagnostic`] values on the side
//! and the decode keeps going wherever it can. Only unreadable framing aborts
//! a decode (see [`crate::cursor::DecodeError::Framing`]).

use crate::cursor::ByteRange;
use std::fmt;

/// How bad a finding is.
///
/// `Warn` marks decoded-but-odd content, `Malformed` marks a container whose
/// bytes could not be decoded (the walk resumes after it), `Error` means
/// decoding from this point on is best effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warn,
    Malformed,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Severity::Warn => "warn",
            Severity::Malformed => "malformed",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

/// One finding, tied to the byte range that caused it when known.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub range: Option<ByteRange>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>, range: Option<ByteRange>) -> Self {
        Diagnostic {
            severity,
            message: message.into(),
            range,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.range {
            Some(r) => write!(f, "{} at {}: {}", self.severity, r, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Ordered collection of findings for one decode. Reporting always succeeds.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn report(&mut self, diag: Diagnostic) {
        self.items.push(diag);
    }

    pub fn warn(&mut self, message: impl Into<String>, range: Option<ByteRange>) {
        self.report(Diagnostic::new(Severity::Warn, message, range));
    }

    pub fn malformed(&mut self, message: impl Into<String>, range: Option<ByteRange>) {
        self.report(Diagnostic::new(Severity::Malformed, message, range));
    }

    pub fn error(&mut self, message: impl Into<String>, range: Option<ByteRange>) {
        self.report(Diagnostic::new(Severity::Error, message, range));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.items.iter().filter(|d| d.severity == severity).count()
    }

    /// Highest severity seen, `None` for a clean decode.
    pub fn worst(&self) -> Option<Severity> {
        self.items.iter().map(|d| d.severity).max()
    }
}
