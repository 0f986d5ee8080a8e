//! # Compilation Pipeline
//!
//! Turns a [`CompilationUnit`] into an [`ArtifactSet`] by driving a compiler
//! collaborator entirely in memory:
//!
//! ```text
//! CompilationUnit ──► Compiler::compile ──► MemorySink (one buffer per unit)
//!                                      └──► DiagnosticCollector
//!                          │
//!                          ▼
//!        verify every buffer as a UnitImage ──► ArtifactSet
//! ```
//!
//! A compilation fails when the collaborator reports any error diagnostic or
//! returns `false`. Failures carry every diagnostic, never just the first.
//! Output that does not verify as a unit image fails the compilation too, so
//! nothing partial or invalid reaches a store.

use std::collections::BTreeMap;
use std::sync::Arc;

use hotload_types::{
    Compiler, Diagnostic, DiagnosticCollector, MemorySink, SourceUnit, UnitImage,
};
use tracing::{debug, trace, warn};

use crate::errors::CompilationError;
use crate::store::Artifact;

/// Option that attaches a library path, passed through verbatim.
pub const CLASSPATH_OPTION: &str = "--classpath";

/// Source text plus everything needed to compile it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationUnit {
    pub qualified_name: String,
    pub source_text: String,
    pub options: Vec<String>,
}

impl CompilationUnit {
    pub fn new(qualified_name: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            source_text: source_text.into(),
            options: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.options.extend(options.into_iter().map(Into::into));
        self
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    pub fn with_classpath(self, path: impl Into<String>) -> Self {
        self.with_option(CLASSPATH_OPTION).with_option(path)
    }
}

/// Everything one successful compilation produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    pub artifacts: BTreeMap<String, Artifact>,
    /// Non-fatal diagnostics that accompanied the output.
    pub warnings: Vec<Diagnostic>,
}

impl ArtifactSet {
    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.artifacts.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

impl IntoIterator for ArtifactSet {
    type Item = Artifact;
    type IntoIter = std::collections::btree_map::IntoValues<String, Artifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.artifacts.into_values()
    }
}

/// Stateless driver around a compiler collaborator.
#[derive(Clone)]
pub struct CompilationPipeline {
    compiler: Arc<dyn Compiler>,
    log_source: bool,
}

impl CompilationPipeline {
    pub fn new(compiler: Arc<dyn Compiler>) -> Self {
        Self {
            compiler,
            log_source: true,
        }
    }

    /// Whether source text is logged at `trace` level before compiling.
    pub fn with_log_source(mut self, enabled: bool) -> Self {
        self.log_source = enabled;
        self
    }

    pub fn compiler(&self) -> &Arc<dyn Compiler> {
        &self.compiler
    }

    pub fn compile(&self, unit: &CompilationUnit) -> Result<ArtifactSet, CompilationError> {
        debug!(
            unit = %unit.qualified_name,
            compiler = self.compiler.name(),
            options = ?unit.options,
            "compiling"
        );
        if self.log_source {
            trace!(unit = %unit.qualified_name, source = %unit.source_text, "source text");
        }

        let sources = [SourceUnit::new(
            unit.qualified_name.clone(),
            unit.source_text.clone(),
        )];
        let mut diagnostics = DiagnosticCollector::new();
        let mut sink = MemorySink::new();
        let ok = self
            .compiler
            .compile(&sources, &unit.options, &mut diagnostics, &mut sink);

        let fail = |diagnostics: Vec<Diagnostic>| CompilationError {
            unit: unit.qualified_name.clone(),
            diagnostics,
        };

        if !ok || diagnostics.has_errors() {
            let mut diagnostics = diagnostics.into_diagnostics();
            if !diagnostics.iter().any(Diagnostic::is_error) {
                diagnostics.push(Diagnostic::error(
                    unit.qualified_name.as_str(),
                    "compiler reported failure without diagnostics",
                ));
            }
            debug!(
                unit = %unit.qualified_name,
                diagnostics = diagnostics.len(),
                "compilation failed"
            );
            return Err(fail(diagnostics));
        }

        let warnings = diagnostics.into_diagnostics();
        let mut artifacts = BTreeMap::new();
        for (name, binary) in sink.into_buffers() {
            if let Err(e) = UnitImage::decode_verified(&binary) {
                let mut diagnostics = warnings.clone();
                diagnostics.push(Diagnostic::error(
                    unit.qualified_name.as_str(),
                    format!("artifact {} is not a valid unit image: {}", name, e),
                ));
                return Err(fail(diagnostics));
            }
            let artifact = Artifact::new(name.clone(), binary);
            debug!(
                unit = %unit.qualified_name,
                artifact = %name,
                digest = %artifact.short_digest(),
                bytes = artifact.binary.len(),
                "artifact captured"
            );
            artifacts.insert(name, artifact);
        }

        for warning in &warnings {
            warn!(unit = %unit.qualified_name, "{}", warning);
        }
        debug!(
            unit = %unit.qualified_name,
            artifacts = artifacts.len(),
            warnings = warnings.len(),
            "compilation finished"
        );
        Ok(ArtifactSet {
            artifacts,
            warnings,
        })
    }
}
