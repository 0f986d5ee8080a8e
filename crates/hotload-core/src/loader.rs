//! # Dynamic Loader
//!
//! A [`Loader`] turns artifacts into [`ExecutableUnit`]s. Resolution order is
//! fixed:
//!
//! ```text
//! resolve(name)
//!   1. own resolved cache      (identity-stable: same Arc every time)
//!   2. own artifact store      (decode + verify + cache)
//!   3. parent resolver         (another Loader, an archive, a library path)
//!   4. LoaderError::NameNotFound, listing every loader consulted
//! ```
//!
//! Units link the names they reference through the loader that resolved them,
//! so a unit defined in a session sees the session's artifacts first, and a
//! unit served by a parent sees only the parent's view.
//!
//! Closing a loader drops its artifacts and cache. Units already handed out
//! keep running their own code, but any link they attempt afterwards fails
//! with [`LoaderError::Closed`].
//!
//! A child holds its parent strongly: a session outlives an engine reset and
//! keeps resolving through the singleton it was created under, which then
//! reports `Closed` rather than disappearing. The parent never refers back to
//! its children, so no cycle forms.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hotload_types::{FunctionImage, Shape, UnitImage, Visibility};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::LoaderError;
use crate::pipeline::ArtifactSet;
use crate::store::{Artifact, ArtifactStore};

// =============================================================================
// UnitResolver Trait
// =============================================================================

/// Anything that can serve units by qualified name. Used as a loader parent.
pub trait UnitResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<ExecutableUnit, LoaderError>;

    /// Label used in logs and in `NameNotFound` search chains.
    fn describe(&self) -> String;
}

// =============================================================================
// UnitCode
// =============================================================================

/// A verified image plus lookup tables for dispatch.
#[derive(Debug)]
pub struct UnitCode {
    image: UnitImage,
    operations: HashMap<(String, Vec<Shape>), usize>,
    fields: HashMap<String, usize>,
}

impl UnitCode {
    /// Build lookup tables. The image must already be verified.
    pub fn new(image: UnitImage) -> Self {
        let operations = image
            .functions
            .iter()
            .enumerate()
            .map(|(idx, f)| ((f.name.clone(), f.params.clone()), idx))
            .collect();
        let fields = image
            .fields
            .iter()
            .enumerate()
            .map(|(idx, f)| (f.name.clone(), idx))
            .collect();
        Self {
            image,
            operations,
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.image.name
    }

    pub fn image(&self) -> &UnitImage {
        &self.image
    }

    /// Exact-shape lookup. Returns the function index.
    pub fn operation(&self, name: &str, shapes: &[Shape]) -> Option<usize> {
        self.operations
            .get(&(name.to_string(), shapes.to_vec()))
            .copied()
    }

    pub fn function(&self, idx: usize) -> Option<&FunctionImage> {
        self.image.functions.get(idx)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.get(name).copied()
    }

    /// Declared signatures, optionally excluding private operations.
    pub fn signatures(&self, include_private: bool) -> Vec<String> {
        self.image
            .functions
            .iter()
            .filter(|f| include_private || f.visibility == Visibility::Public)
            .map(FunctionImage::signature)
            .collect()
    }
}

// =============================================================================
// ExecutableUnit
// =============================================================================

/// A loaded unit, bound to the loader that defined it.
#[derive(Clone)]
pub struct ExecutableUnit {
    code: Arc<UnitCode>,
    loader: Loader,
}

impl ExecutableUnit {
    pub fn name(&self) -> &str {
        self.code.name()
    }

    pub fn code(&self) -> &Arc<UnitCode> {
        &self.code
    }

    /// The defining loader.
    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn shape(&self) -> Shape {
        Shape::Unit(self.name().to_string())
    }

    /// Same materialization of the same artifact in the same loader.
    pub fn ptr_eq(&self, other: &ExecutableUnit) -> bool {
        Arc::ptr_eq(&self.code, &other.code)
    }

    /// Resolve a unit this one references, through the defining loader.
    pub fn link(&self, name: &str) -> Result<ExecutableUnit, LoaderError> {
        self.loader.resolve(name)
    }
}

impl fmt::Debug for ExecutableUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableUnit")
            .field("name", &self.name())
            .field("loader", &self.loader.label())
            .finish()
    }
}

// =============================================================================
// Loader
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Fresh,
    Populated,
    Closed,
}

struct Tables {
    state: LoaderState,
    artifacts: ArtifactStore,
    resolved: HashMap<String, Arc<UnitCode>>,
}

struct LoaderInner {
    id: Uuid,
    label: String,
    /// Owning link; keeps the parent alive for as long as this loader is.
    parent: Option<Arc<dyn UnitResolver>>,
    tables: Mutex<Tables>,
}

/// Cheap-to-clone handle; clones share the same loader.
#[derive(Clone)]
pub struct Loader {
    inner: Arc<LoaderInner>,
}

impl Loader {
    pub fn new(label: impl Into<String>) -> Self {
        Self::build(label.into(), None)
    }

    /// A loader that falls back to `parent`. The parent stays alive while
    /// this loader does, even if every other handle to it is dropped.
    pub fn with_parent(label: impl Into<String>, parent: Arc<dyn UnitResolver>) -> Self {
        Self::build(label.into(), Some(parent))
    }

    fn build(label: String, parent: Option<Arc<dyn UnitResolver>>) -> Self {
        let id = Uuid::new_v4();
        debug!(
            loader = %label,
            id = %id,
            parent = ?parent.as_ref().map(|p| p.describe()),
            "loader created"
        );
        Self {
            inner: Arc::new(LoaderInner {
                id,
                label,
                parent,
                tables: Mutex::new(Tables {
                    state: LoaderState::Fresh,
                    artifacts: ArtifactStore::new(),
                    resolved: HashMap::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn parent(&self) -> Option<&Arc<dyn UnitResolver>> {
        self.inner.parent.as_ref()
    }

    pub fn state(&self) -> LoaderState {
        self.inner.tables.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == LoaderState::Closed
    }

    /// Both handles refer to the same loader.
    pub fn same_loader(&self, other: &Loader) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Make an artifact available to this loader. Redefining a name evicts its
    /// cached unit, so later resolutions see the new version while units
    /// already handed out keep the old one.
    pub fn define(&self, artifact: Artifact) -> Result<(), LoaderError> {
        let mut tables = self.inner.tables.lock();
        if tables.state == LoaderState::Closed {
            return Err(LoaderError::Closed {
                loader: self.inner.label.clone(),
                name: artifact.qualified_name,
            });
        }
        tables.state = LoaderState::Populated;
        if tables.resolved.remove(&artifact.qualified_name).is_some() {
            debug!(
                loader = %self.inner.label,
                unit = %artifact.qualified_name,
                "evicted resolved unit on redefinition"
            );
        }
        tables.artifacts.put(artifact);
        Ok(())
    }

    pub fn define_all(&self, artifacts: impl IntoIterator<Item = Artifact>) -> Result<(), LoaderError> {
        for artifact in artifacts {
            self.define(artifact)?;
        }
        Ok(())
    }

    /// Convenience for defining a whole pipeline result.
    pub fn define_set(&self, set: ArtifactSet) -> Result<(), LoaderError> {
        self.define_all(set)
    }

    /// Whether this loader itself holds an artifact for `name` (parents are
    /// not consulted).
    pub fn contains(&self, name: &str) -> bool {
        self.inner.tables.lock().artifacts.contains(name)
    }

    /// Names of the artifacts this loader holds.
    pub fn names(&self) -> Vec<String> {
        self.inner.tables.lock().artifacts.names()
    }

    /// Copy of this loader's own artifact store.
    pub fn artifacts(&self) -> ArtifactStore {
        self.inner.tables.lock().artifacts.clone()
    }

    pub fn resolve(&self, name: &str) -> Result<ExecutableUnit, LoaderError> {
        {
            let mut tables = self.inner.tables.lock();
            if tables.state == LoaderState::Closed {
                return Err(LoaderError::Closed {
                    loader: self.inner.label.clone(),
                    name: name.to_string(),
                });
            }
            if let Some(code) = tables.resolved.get(name) {
                return Ok(self.bind(code.clone()));
            }
            if let Some(artifact) = tables.artifacts.get(name) {
                let code = Arc::new(materialize(artifact)?);
                debug!(
                    loader = %self.inner.label,
                    unit = %name,
                    digest = %artifact.short_digest(),
                    operations = code.image().functions.len(),
                    "unit materialized"
                );
                tables.resolved.insert(name.to_string(), code.clone());
                return Ok(self.bind(code));
            }
        }

        match &self.inner.parent {
            Some(parent) => parent.resolve(name).map_err(|e| match e {
                LoaderError::NameNotFound { name, mut searched } => {
                    searched.insert(0, self.inner.label.clone());
                    LoaderError::NameNotFound { name, searched }
                }
                other => other,
            }),
            None => Err(LoaderError::NameNotFound {
                name: name.to_string(),
                searched: vec![self.inner.label.clone()],
            }),
        }
    }

    /// Release artifacts and cached units. Idempotent.
    pub fn close(&self) {
        let mut tables = self.inner.tables.lock();
        if tables.state == LoaderState::Closed {
            return;
        }
        let released = tables.artifacts.len();
        tables.state = LoaderState::Closed;
        tables.artifacts.clear();
        tables.resolved.clear();
        info!(
            loader = %self.inner.label,
            id = %self.inner.id,
            artifacts = released,
            "loader closed"
        );
    }

    fn bind(&self, code: Arc<UnitCode>) -> ExecutableUnit {
        ExecutableUnit {
            code,
            loader: self.clone(),
        }
    }
}

fn materialize(artifact: &Artifact) -> Result<UnitCode, LoaderError> {
    let malformed = |reason: String| LoaderError::Malformed {
        name: artifact.qualified_name.clone(),
        reason,
    };
    let image = UnitImage::decode_verified(&artifact.binary).map_err(|e| malformed(e.to_string()))?;
    if image.name != artifact.qualified_name {
        return Err(malformed(format!("image declares unit {}", image.name)));
    }
    Ok(UnitCode::new(image))
}

impl UnitResolver for Loader {
    fn resolve(&self, name: &str) -> Result<ExecutableUnit, LoaderError> {
        Loader::resolve(self, name)
    }

    fn describe(&self) -> String {
        self.inner.label.clone()
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("label", &self.inner.label)
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}
