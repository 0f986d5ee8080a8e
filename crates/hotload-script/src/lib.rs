//! # Unit script compiler
//!
//! The built-in compiler collaborator for the hotload pipeline. It turns
//! unit script source into [`UnitImage`]s:
//!
//! ```text
//! source ──► lexer ──► parser (recovers per statement/member) ──► codegen ──► images
//! ```
//!
//! All diagnostics from all phases are reported; artifacts are only written
//! when no error was reported for any source in the batch.
//!
//! ## Options
//!
//! - `--deny-warnings`: report warnings as errors
//! - `--classpath <path>`: accepted for compatibility; unit script links
//!   dotted names at run time, so the value is ignored
//!
//! Unrecognized options produce a warning.

pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod parser;

use std::collections::BTreeSet;
use std::io::Write;

use hotload_types::{
    ArtifactSink, Compiler, Diagnostic, DiagnosticSink, Severity, SourceUnit, UnitImage,
};
use tracing::debug;

pub use codegen::UnitCompiler;
pub use lexer::{Lexer, Pos, Token};

const DENY_WARNINGS: &str = "--deny-warnings";
const CLASSPATH: &str = "--classpath";

#[derive(Debug, Default, Clone, Copy)]
struct Options {
    deny_warnings: bool,
}

fn parse_options(options: &[String], unit: &str, out: &mut Vec<Diagnostic>) -> Options {
    let mut parsed = Options::default();
    let mut iter = options.iter();
    while let Some(option) = iter.next() {
        match option.as_str() {
            DENY_WARNINGS => parsed.deny_warnings = true,
            CLASSPATH => {
                if iter.next().is_none() {
                    out.push(Diagnostic::warning(unit, "option --classpath expects a value"));
                }
            }
            other => out.push(Diagnostic::warning(unit, format!("unrecognized option '{}'", other))),
        }
    }
    parsed
}

/// Compile one source into images plus its diagnostics.
pub fn compile_source(source: &SourceUnit) -> (Vec<UnitImage>, Vec<Diagnostic>) {
    let name = source.qualified_name.as_str();
    let (tokens, lex_errors) = Lexer::new(&source.text).tokenize();
    let (units, parse_errors) = parser::parse(tokens);

    let mut diagnostics: Vec<Diagnostic> = lex_errors
        .into_iter()
        .map(|e| Diagnostic::error(name, e.message).at(e.pos.line, e.pos.col))
        .chain(
            parse_errors
                .into_iter()
                .map(|e| Diagnostic::error(name, e.message).at(e.pos.line, e.pos.col)),
        )
        .collect();

    if !diagnostics.is_empty() {
        // Semantic checks on a partial tree only add noise.
        diagnostics.sort_by_key(|d| (d.line, d.column));
        return (Vec::new(), diagnostics);
    }

    UnitCompiler::new(name).compile(&units)
}

/// [`Compiler`] implementation for unit script.
#[derive(Debug, Default, Clone)]
pub struct ScriptCompiler;

impl ScriptCompiler {
    pub fn new() -> Self {
        ScriptCompiler
    }
}

impl Compiler for ScriptCompiler {
    fn compile(
        &self,
        sources: &[SourceUnit],
        options: &[String],
        diagnostics: &mut dyn DiagnosticSink,
        output: &mut dyn ArtifactSink,
    ) -> bool {
        let batch = sources
            .first()
            .map(|s| s.qualified_name.as_str())
            .unwrap_or("<options>");
        let mut reported = Vec::new();
        let options = parse_options(options, batch, &mut reported);

        let mut images = Vec::new();
        let mut seen = BTreeSet::new();
        for source in sources {
            let (compiled, source_diagnostics) = compile_source(source);
            reported.extend(source_diagnostics);
            for image in compiled {
                if !seen.insert(image.name.clone()) {
                    reported.push(Diagnostic::error(
                        source.qualified_name.as_str(),
                        format!("unit {} is declared by more than one source", image.name),
                    ));
                    continue;
                }
                images.push(image);
            }
        }

        if options.deny_warnings {
            for diagnostic in &mut reported {
                diagnostic.severity = Severity::Error;
            }
        }

        let failed = reported.iter().any(Diagnostic::is_error);
        debug!(
            compiler = self.name(),
            sources = sources.len(),
            units = images.len(),
            diagnostics = reported.len(),
            failed,
            "unit script compiled"
        );
        for diagnostic in reported {
            diagnostics.report(diagnostic);
        }
        if failed {
            return false;
        }

        for image in images {
            let bytes = match image.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    diagnostics.report(Diagnostic::error(batch, e.to_string()));
                    return false;
                }
            };
            if let Err(e) = output.open_artifact(&image.name).write_all(&bytes) {
                diagnostics.report(Diagnostic::error(
                    batch,
                    format!("failed to write artifact {}: {}", image.name, e),
                ));
                return false;
            }
        }
        true
    }

    fn name(&self) -> &str {
        "unit-script"
    }
}
