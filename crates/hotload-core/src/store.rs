//! Artifact store: qualified name → compiled artifact.
//!
//! The store is a plain map with last-write-wins semantics. It is not
//! synchronized: every store is owned by a loader and guarded by that
//! loader's lock. The process-wide store is the engine singleton's.

use std::collections::BTreeMap;

use hotload_types::encoding::{sha256_hex, short_digest};
use tracing::debug;

/// Binary output for one unit, as produced by a compiler collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub qualified_name: String,
    pub binary: Vec<u8>,
    /// SHA-256 of `binary`, hex encoded.
    pub digest: String,
}

impl Artifact {
    pub fn new(qualified_name: impl Into<String>, binary: Vec<u8>) -> Self {
        let digest = sha256_hex(&binary);
        Self {
            qualified_name: qualified_name.into(),
            binary,
            digest,
        }
    }

    /// Abbreviated digest for log lines.
    pub fn short_digest(&self) -> String {
        short_digest(&self.binary)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    artifacts: BTreeMap<String, Artifact>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns the artifact previously stored under the
    /// same name, if any.
    pub fn put(&mut self, artifact: Artifact) -> Option<Artifact> {
        let previous = self
            .artifacts
            .insert(artifact.qualified_name.clone(), artifact);
        if let Some(old) = &previous {
            if let Some(new) = self.artifacts.get(&old.qualified_name) {
                debug!(
                    unit = %new.qualified_name,
                    old_digest = %old.short_digest(),
                    new_digest = %new.short_digest(),
                    "replacing stored artifact"
                );
            }
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    /// Every stored artifact, keyed by qualified name.
    pub fn get_all(&self) -> &BTreeMap<String, Artifact> {
        &self.artifacts
    }

    pub fn remove(&mut self, name: &str) -> Option<Artifact> {
        self.artifacts.remove(name)
    }

    pub fn extend(&mut self, artifacts: impl IntoIterator<Item = Artifact>) {
        for artifact in artifacts {
            self.put(artifact);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.artifacts.contains_key(name)
    }

    pub fn clear(&mut self) {
        self.artifacts.clear();
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.artifacts.keys().cloned().collect()
    }
}

impl IntoIterator for ArtifactStore {
    type Item = Artifact;
    type IntoIter = std::collections::btree_map::IntoValues<String, Artifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.artifacts.into_values()
    }
}
