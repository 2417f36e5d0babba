//! Diagnostic sink shared by the parser, verifier, and front ends

use serde::Serialize;

use crate::support::source::{SourceLoc, SourceManager};

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    /// Prevents the requested operation from succeeding
    Error,
    /// Suspicious but not fatal
    Warning,
    /// Supplementary information
    Note,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
            Severity::Note => f.write_str("note"),
        }
    }
}

/// A single reported diagnostic
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    /// How severe the finding is
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
    /// Where it was found (UNKNOWN when not tied to a position)
    pub loc: SourceLoc,
}

impl Diagnostic {
    /// Render in the stable `severity: file:line:col: message` format
    pub fn render(&self, files: &SourceManager) -> String {
        if self.loc.is_known() {
            let path = files.path(self.loc.file).unwrap_or("<unknown>");
            format!(
                "{}: {}:{}:{}: {}",
                self.severity, path, self.loc.line, self.loc.col, self.message
            )
        } else {
            format!("{}: {}", self.severity, self.message)
        }
    }
}

/// Append-only collector of diagnostics.
///
/// The sink is the one cross-cutting shared resource of the toolchain and is
/// only ever appended to from the single running thread.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticSink {
    diags: Vec<Diagnostic>,
}

impl DiagnosticSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a diagnostic
    pub fn push(&mut self, severity: Severity, message: impl Into<String>, loc: SourceLoc) {
        self.diags.push(Diagnostic {
            severity,
            message: message.into(),
            loc,
        });
    }

    /// Append an error
    pub fn error(&mut self, message: impl Into<String>, loc: SourceLoc) {
        self.push(Severity::Error, message, loc);
    }

    /// Append a warning
    pub fn warning(&mut self, message: impl Into<String>, loc: SourceLoc) {
        self.push(Severity::Warning, message, loc);
    }

    /// Iterate over collected diagnostics in append order
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags.iter()
    }

    /// Number of error-severity diagnostics
    pub fn error_count(&self) -> usize {
        self.diags
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// Total number of diagnostics
    pub fn len(&self) -> usize {
        self.diags.len()
    }

    /// True when nothing has been reported
    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }

    /// Render every diagnostic and clear the sink
    pub fn flush(&mut self, files: &SourceManager) -> Vec<String> {
        let rendered = self.diags.iter().map(|d| d.render(files)).collect();
        self.diags.clear();
        rendered
    }
}
