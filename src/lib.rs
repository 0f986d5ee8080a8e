//! hotload
//!
//! Compile unit source at run time, load it into isolated or shared loaders,
//! and call it, with or without interception:
//!
//! - **Compilation**: [`CompilationPipeline`] drives a [`Compiler`] in memory
//!   and aggregates every diagnostic it reports
//! - **Loading**: [`Loader`] resolves names through its own cache, its own
//!   artifacts, then its parent; [`Engine`] owns the process-wide singleton
//! - **Invocation**: exact-shape calls by unit, object or published name, and
//!   [`proxy`] for before/after/on-error hooks
//!
//! The workspace crates are re-exported here; [`script_engine`] wires the
//! engine to the built-in unit script compiler.
//!
//! ```ignore
//! use hotload::{script_engine, EngineConfig};
//!
//! let engine = script_engine(EngineConfig::from_env());
//! let unit = engine.compile_once(source, "demo.Greeter")?;
//! let greeting = engine.invoke_unit(&unit, "greet", vec!["world".into()])?;
//! ```

use std::sync::Arc;

pub use hotload_core::*;
pub use hotload_script::ScriptCompiler;
pub use hotload_types::{Compiler, Diagnostic, Severity, Shape, SourceUnit, UnitImage};

/// The workspace crates, for paths not re-exported at the root.
pub mod crates {
    pub use hotload_core as core;
    pub use hotload_script as script;
    pub use hotload_types as types;
}

/// An engine that compiles with [`ScriptCompiler`].
pub fn script_engine(config: EngineConfig) -> Engine {
    Engine::new(config, Arc::new(ScriptCompiler::new()))
}

/// Constructor shorthand on [`Engine`] for the built-in compiler.
pub trait ScriptEngineExt {
    fn with_script_compiler(config: EngineConfig) -> Self;
}

impl ScriptEngineExt for Engine {
    fn with_script_compiler(config: EngineConfig) -> Self {
        script_engine(config)
    }
}
