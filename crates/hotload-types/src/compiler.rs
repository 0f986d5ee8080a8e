//! # Compiler collaborator contract
//!
//! The pipeline never parses source itself. It hands [`SourceUnit`]s to a
//! [`Compiler`], together with a [`DiagnosticSink`] and an [`ArtifactSink`].
//! The compiler reports every diagnostic to the sink and writes every output
//! artifact (the top-level unit and any nested units) to a stream it opens
//! on the artifact sink under the artifact's own qualified name.
//!
//! ```text
//! SourceUnit(s) ──► Compiler::compile ──► DiagnosticSink (errors, warnings)
//!                                    └──► ArtifactSink::open_artifact(name) ──► io::Write
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One compiler message, located in the source of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Qualified name of the source unit the message refers to.
    pub unit: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
}

impl Diagnostic {
    pub fn error(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            unit: unit.into(),
            line: None,
            column: None,
            message: message.into(),
        }
    }

    pub fn warning(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(unit, message)
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(l), Some(c)) => write!(f, "{}:{}:{}: ", self.unit, l, c)?,
            (Some(l), None) => write!(f, "{}:{}: ", self.unit, l)?,
            _ => write!(f, "{}: ", self.unit)?,
        }
        write!(f, "{}: {}", self.severity, self.message)
    }
}

pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

/// Collects diagnostics in report order.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }
}

impl DiagnosticSink for DiagnosticCollector {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

/// Receives output artifacts. The compiler calls `open_artifact` once per
/// artifact and writes the binary into the returned stream.
pub trait ArtifactSink {
    fn open_artifact(&mut self, qualified_name: &str) -> &mut dyn io::Write;
}

/// Artifact sink backed by memory buffers instead of files.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffers: BTreeMap<String, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn into_buffers(self) -> BTreeMap<String, Vec<u8>> {
        self.buffers
    }
}

impl ArtifactSink for MemorySink {
    fn open_artifact(&mut self, qualified_name: &str) -> &mut dyn io::Write {
        // Reopening a name truncates, the way creating an output file would.
        let buffer = self.buffers.entry(qualified_name.to_string()).or_default();
        buffer.clear();
        buffer
    }
}

/// Source text of one compilation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub qualified_name: String,
    pub text: String,
}

impl SourceUnit {
    pub fn new(qualified_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            text: text.into(),
        }
    }
}

/// A compiler collaborator.
///
/// Returns `true` on success. A `false` return, or any reported diagnostic of
/// severity [`Severity::Error`], marks the compilation as failed.
/// `options` are passed through verbatim by the caller.
pub trait Compiler: Send + Sync {
    fn compile(
        &self,
        sources: &[SourceUnit],
        options: &[String],
        diagnostics: &mut dyn DiagnosticSink,
        output: &mut dyn ArtifactSink,
    ) -> bool;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "compiler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::error("demo.A", "expected ';'").at(3, 14);
        assert_eq!(d.to_string(), "demo.A:3:14: error: expected ';'");
        let w = Diagnostic::warning("demo.A", "unreachable statement");
        assert_eq!(w.to_string(), "demo.A: warning: unreachable statement");
    }

    #[test]
    fn test_collector_counts() {
        let mut collector = DiagnosticCollector::new();
        collector.report(Diagnostic::warning("a", "w"));
        assert!(!collector.has_errors());
        collector.report(Diagnostic::error("a", "e"));
        assert!(collector.has_errors());
        assert_eq!(collector.error_count(), 1);
        assert_eq!(collector.diagnostics().len(), 2);
    }

    #[test]
    fn test_memory_sink_captures_by_name() {
        let mut sink = MemorySink::new();
        sink.open_artifact("demo.A").write_all(b"abc").unwrap();
        sink.open_artifact("demo.A.B").write_all(b"xy").unwrap();
        sink.open_artifact("demo.A").write_all(b"new").unwrap();
        let buffers = sink.into_buffers();
        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers["demo.A"], b"new");
        assert_eq!(buffers["demo.A.B"], b"xy");
    }
}
