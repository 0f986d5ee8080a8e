//! # hotload-core
//!
//! Dynamic compilation and loading: source text in, callable units out,
//! replaceable at run time without restarting the process.
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | Drive a compiler collaborator in memory, aggregate diagnostics |
//! | [`store`] | Name → artifact map |
//! | [`loader`] | Artifacts → executable units; cache, parent chain, close |
//! | [`vm`] | Stack interpreter for unit images |
//! | [`invoke`] | Exact-shape host calls, by unit, object or published name |
//! | [`intercept`] | Proxies running before/after/on-error hooks |
//! | [`registry`] | Named instances and publish-with-replace |
//! | [`archive`] | Pre-compiled unit archives and the library path |
//! | [`engine`] | Process-wide state: singleton loader, shared store, reset |
//! | [`config`] | Engine configuration with environment overlay |

pub mod archive;
pub mod config;
pub mod engine;
pub mod errors;
pub mod intercept;
pub mod invoke;
pub mod loader;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod value;
pub mod vm;

pub use archive::{write_archive, ArchiveLoader, LibraryPath};
pub use config::EngineConfig;
pub use engine::Engine;
pub use errors::{
    CompilationError, EngineError, Fault, FaultKind, InvocationError, LoaderError, RegistryError,
};
pub use intercept::{
    proxy, proxy_chain, proxy_timed, CallInfo, EventLog, HookEvent, Interceptor,
    RecordingInterceptor, TimingInterceptor,
};
pub use invoke::{invoke, invoke_named, invoke_unit};
pub use loader::{ExecutableUnit, Loader, LoaderState, UnitResolver};
pub use pipeline::{ArtifactSet, CompilationPipeline, CompilationUnit};
pub use registry::{publish, InstanceRegistry, SingletonRegistry};
pub use store::{Artifact, ArtifactStore};
pub use value::{Instance, ObjectRef, Value};
pub use vm::ExecutionLimits;
