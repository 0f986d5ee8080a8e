//! Shared types for the hotload workspace.
//!
//! This crate provides the types that both compiler collaborators and the
//! loading engine need, so neither has to depend on the other:
//!
//! - [`compiler`]: the compiler collaborator contract (diagnostics, artifact sinks)
//! - [`image`]: the binary unit image format that artifacts carry
//! - [`shape`]: value shapes used for exact-match dispatch
//! - [`name`]: qualified name helpers
//! - [`encoding`]: base64 and digest helpers
//! - [`env_utils`]: environment variable parsing

pub mod compiler;
pub mod encoding;
pub mod env_utils;
pub mod image;
pub mod name;
pub mod shape;

pub use compiler::{
    ArtifactSink, Compiler, Diagnostic, DiagnosticCollector, DiagnosticSink, MemorySink,
    Severity, SourceUnit,
};
pub use image::{
    Constant, FieldImage, FunctionImage, Intrinsic, Op, UnitImage, Visibility, FORMAT_VERSION,
};
pub use shape::Shape;
