//! # Engine
//!
//! The engine owns the process-wide state of dynamic loading: the singleton
//! loader (whose artifact table is the shared store) and the library path of
//! attached archives. Everything else (isolated loaders, sessions) is created on
//! demand and owned by the caller.
//!
//! ## Loader topology
//!
//! ```text
//!                 LibraryPath (archives, survives reset)
//!                   ▲                    ▲
//!                   │ parent             │ parent
//!            singleton loader      isolated loaders (compile_once)
//!                   ▲
//!                   │ parent
//!            session loaders (session)
//! ```
//!
//! `reset` swaps in a fresh singleton and closes the old one in a single
//! step under the engine lock; no resolve can observe a half-reset engine.
//!
//! ## Usage
//!
//! ```ignore
//! let engine = Engine::new(EngineConfig::default(), Arc::new(ScriptCompiler::new()));
//! let unit = engine.compile_once(source, "demo.Greeter")?;
//! let greeting = engine.invoke_unit(&unit, "greet", vec!["world".into()])?;
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use hotload_types::Compiler;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::archive::{ArchiveLoader, LibraryPath};
use crate::config::EngineConfig;
use crate::errors::{CompilationError, EngineError, InvocationError};
use crate::invoke::{invoke_named_with, invoke_unit_with, invoke_with};
use crate::loader::{ExecutableUnit, Loader, UnitResolver};
use crate::pipeline::{ArtifactSet, CompilationPipeline, CompilationUnit};
use crate::registry::{publish, InstanceRegistry};
use crate::store::ArtifactStore;
use crate::value::{ObjectRef, Value};

pub const SINGLETON_LABEL: &str = "singleton";

struct SharedState {
    /// Its own artifact table is the process-wide store.
    singleton: Loader,
    /// Incremented by every reset.
    generation: u64,
}

pub struct Engine {
    config: EngineConfig,
    pipeline: CompilationPipeline,
    library: Arc<LibraryPath>,
    shared: Mutex<SharedState>,
}

impl Engine {
    pub fn new(config: EngineConfig, compiler: Arc<dyn Compiler>) -> Self {
        let pipeline = CompilationPipeline::new(compiler).with_log_source(config.log_source);
        let library = Arc::new(LibraryPath::new());
        let singleton = Self::fresh_singleton(&library);
        Self {
            config,
            pipeline,
            library,
            shared: Mutex::new(SharedState {
                singleton,
                generation: 0,
            }),
        }
    }

    fn fresh_singleton(library: &Arc<LibraryPath>) -> Loader {
        let parent: Arc<dyn UnitResolver> = library.clone();
        Loader::with_parent(SINGLETON_LABEL, parent)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply the configured default options ahead of the unit's own.
    fn prepare(&self, unit: &CompilationUnit) -> CompilationUnit {
        if self.config.default_options.is_empty() {
            return unit.clone();
        }
        let mut options = self.config.default_options.clone();
        options.extend(unit.options.iter().cloned());
        CompilationUnit {
            options,
            ..unit.clone()
        }
    }

    // =========================================================================
    // Compilation and loading
    // =========================================================================

    /// Run the pipeline only; nothing is stored or loaded.
    pub fn compile(&self, unit: &CompilationUnit) -> Result<ArtifactSet, CompilationError> {
        self.pipeline.compile(&self.prepare(unit))
    }

    /// Compile into a fresh loader that shares nothing with the singleton or
    /// with other isolated loaders, and resolve `name` from it.
    pub fn compile_once(&self, source: &str, name: &str) -> Result<ExecutableUnit, EngineError> {
        self.compile_once_unit(&CompilationUnit::new(name, source))
    }

    pub fn compile_once_unit(&self, unit: &CompilationUnit) -> Result<ExecutableUnit, EngineError> {
        let set = self.compile(unit)?;
        let parent: Arc<dyn UnitResolver> = self.library.clone();
        let loader = Loader::with_parent(format!("isolated:{}", unit.qualified_name), parent);
        loader.define_set(set)?;
        Ok(loader.resolve(&unit.qualified_name)?)
    }

    /// Compile and publish the artifacts into the singleton loader's store.
    /// Returns the names of the artifacts published.
    pub fn compile_shared(&self, source: &str, name: &str) -> Result<Vec<String>, EngineError> {
        self.compile_shared_unit(&CompilationUnit::new(name, source))
    }

    pub fn compile_shared_unit(&self, unit: &CompilationUnit) -> Result<Vec<String>, EngineError> {
        let set = self.compile(unit)?;
        let names = set.names();
        let shared = self.shared.lock();
        shared.singleton.define_set(set)?;
        info!(
            unit = %unit.qualified_name,
            artifacts = ?names,
            generation = shared.generation,
            "published to singleton"
        );
        Ok(names)
    }

    /// Resolve through the singleton loader.
    pub fn load(&self, name: &str) -> Result<ExecutableUnit, EngineError> {
        let shared = self.shared.lock();
        Ok(shared.singleton.resolve(name)?)
    }

    /// A new loader whose parent is the current singleton. Its own
    /// definitions shadow the singleton's.
    pub fn session(&self, label: &str) -> Loader {
        let shared = self.shared.lock();
        let parent: Arc<dyn UnitResolver> = Arc::new(shared.singleton.clone());
        Loader::with_parent(label, parent)
    }

    /// Compile into the singleton, resolve `name` and publish it in
    /// `registry`, replacing an earlier version. Returns the published name.
    pub fn deploy(
        &self,
        source: &str,
        name: &str,
        registry: &dyn InstanceRegistry,
    ) -> Result<String, EngineError> {
        self.compile_shared(source, name)?;
        let unit = self.load(name)?;
        Ok(publish(registry, &unit)?)
    }

    /// Discard everything loaded through the singleton.
    ///
    /// Units and instances already handed out keep working for their own
    /// code; links they attempt afterwards fail with `LoaderError::Closed`.
    /// Attached archives are kept.
    pub fn reset(&self) {
        let mut shared = self.shared.lock();
        let old = std::mem::replace(&mut shared.singleton, Self::fresh_singleton(&self.library));
        shared.generation += 1;
        old.close();
        info!(
            generation = shared.generation,
            old_loader = %old.id(),
            "engine reset"
        );
    }

    /// Attach an archive at the end of the library path.
    pub fn add_archive(&self, path: &Path) -> Result<()> {
        let archive = ArchiveLoader::open(path)?;
        debug!(archive = %archive.name(), members = ?archive.member_names(), "attaching archive");
        self.library.push(archive);
        Ok(())
    }

    pub fn library_path(&self) -> &Arc<LibraryPath> {
        &self.library
    }

    /// Copy of the process-wide artifact store.
    pub fn store_snapshot(&self) -> ArtifactStore {
        self.shared.lock().singleton.artifacts()
    }

    /// The current singleton loader.
    pub fn singleton(&self) -> Loader {
        self.shared.lock().singleton.clone()
    }

    /// Number of resets so far.
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    // =========================================================================
    // Invocation with the configured limits
    // =========================================================================

    pub fn invoke_unit(
        &self,
        unit: &ExecutableUnit,
        member: &str,
        args: Vec<Value>,
    ) -> Result<Value, InvocationError> {
        invoke_unit_with(self.config.limits(), unit, member, args)
    }

    pub fn invoke(&self, target: &ObjectRef, member: &str, args: Vec<Value>) -> Result<Value, InvocationError> {
        invoke_with(self.config.limits(), target, member, args)
    }

    pub fn invoke_named(
        &self,
        registry: &dyn InstanceRegistry,
        name: &str,
        member: &str,
        args: Vec<Value>,
    ) -> Result<Value, InvocationError> {
        invoke_named_with(self.config.limits(), registry, name, member, args)
    }
}
