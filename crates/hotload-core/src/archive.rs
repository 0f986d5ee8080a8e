//! # Unit archives
//!
//! An archive is a JSON file bundling pre-compiled artifacts, so that a
//! library of units can be shipped and attached at run time without source:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "name": "greetings",
//!   "artifacts": [
//!     { "name": "lib.Greeter", "digest": "ba78…", "bytecode_base64": "AQ…" }
//!   ]
//! }
//! ```
//!
//! Archives are validated when opened: every member's digest must match its
//! bytes and every member must verify as a unit image of the declared name.
//! A [`LibraryPath`] is an ordered list of archives consulted front to back.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use hotload_types::encoding::{base64_decode, base64_encode, sha256_hex};
use hotload_types::UnitImage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::LoaderError;
use crate::loader::{ExecutableUnit, Loader, UnitResolver};
use crate::store::Artifact;

pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchiveFile {
    format_version: u32,
    name: String,
    artifacts: Vec<ArchiveMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchiveMember {
    name: String,
    digest: String,
    bytecode_base64: String,
}

/// Write `artifacts` to `path` as an archive called `name`.
pub fn write_archive<'a>(
    path: &Path,
    name: &str,
    artifacts: impl IntoIterator<Item = &'a Artifact>,
) -> Result<()> {
    let file = ArchiveFile {
        format_version: ARCHIVE_FORMAT_VERSION,
        name: name.to_string(),
        artifacts: artifacts
            .into_iter()
            .map(|a| ArchiveMember {
                name: a.qualified_name.clone(),
                digest: a.digest.clone(),
                bytecode_base64: base64_encode(&a.binary),
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&file)?;
    fs::write(path, json).with_context(|| format!("write archive {}", path.display()))?;
    info!(archive = %name, path = %path.display(), members = file.artifacts.len(), "archive written");
    Ok(())
}

/// A validated archive, served through its own loader.
pub struct ArchiveLoader {
    name: String,
    path: PathBuf,
    loader: Loader,
}

impl ArchiveLoader {
    pub fn open(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read archive {}", path.display()))?;
        let file: ArchiveFile = serde_json::from_str(&raw)
            .with_context(|| format!("parse archive {}", path.display()))?;
        if file.format_version != ARCHIVE_FORMAT_VERSION {
            bail!(
                "archive {} has format version {} (expected {})",
                path.display(),
                file.format_version,
                ARCHIVE_FORMAT_VERSION
            );
        }

        let loader = Loader::new(format!("archive:{}", file.name));
        for member in &file.artifacts {
            let artifact = validate_member(member)
                .with_context(|| format!("archive {} member {}", path.display(), member.name))?;
            loader
                .define(artifact)
                .map_err(|e| anyhow!("archive {}: {}", path.display(), e))?;
        }
        debug!(
            archive = %file.name,
            path = %path.display(),
            members = file.artifacts.len(),
            "archive opened"
        );
        Ok(Self {
            name: file.name,
            path: path.to_path_buf(),
            loader,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn member_names(&self) -> Vec<String> {
        self.loader.names()
    }

    pub fn load_member(&self, name: &str) -> Result<ExecutableUnit, LoaderError> {
        self.loader.resolve(name)
    }
}

fn validate_member(member: &ArchiveMember) -> Result<Artifact> {
    let binary = base64_decode(&member.bytecode_base64, "member bytecode")?;
    let digest = sha256_hex(&binary);
    if digest != member.digest {
        bail!("digest mismatch: recorded {}, computed {}", member.digest, digest);
    }
    let image = UnitImage::decode_verified(&binary)?;
    if image.name != member.name {
        bail!("member holds unit {}", image.name);
    }
    Ok(Artifact::new(member.name.clone(), binary))
}

impl UnitResolver for ArchiveLoader {
    fn resolve(&self, name: &str) -> Result<ExecutableUnit, LoaderError> {
        self.load_member(name)
    }

    fn describe(&self) -> String {
        self.loader.label().to_string()
    }
}

/// Ordered archives. The first archive holding a name supplies it.
#[derive(Default)]
pub struct LibraryPath {
    archives: RwLock<Vec<Arc<ArchiveLoader>>>,
}

impl LibraryPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, archive: ArchiveLoader) {
        info!(archive = %archive.name(), path = %archive.path().display(), "archive added to library path");
        self.archives.write().push(Arc::new(archive));
    }

    pub fn len(&self) -> usize {
        self.archives.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.read().is_empty()
    }

    pub fn archive_names(&self) -> Vec<String> {
        self.archives.read().iter().map(|a| a.name().to_string()).collect()
    }
}

impl UnitResolver for LibraryPath {
    fn resolve(&self, name: &str) -> Result<ExecutableUnit, LoaderError> {
        let archives = self.archives.read();
        let mut searched = Vec::with_capacity(archives.len());
        for archive in archives.iter() {
            match archive.resolve(name) {
                Ok(unit) => return Ok(unit),
                Err(LoaderError::NameNotFound { .. }) => searched.push(archive.describe()),
                Err(other) => return Err(other),
            }
        }
        if searched.is_empty() {
            searched.push(self.describe());
        }
        Err(LoaderError::NameNotFound {
            name: name.to_string(),
            searched,
        })
    }

    fn describe(&self) -> String {
        "library-path".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str) -> Artifact {
        Artifact::new(name, UnitImage::new(name).encode().expect("encode"))
    }

    #[test]
    fn test_write_then_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lib.json");
        let members = [artifact("lib.A"), artifact("lib.B")];
        write_archive(&path, "lib", members.iter()).expect("write");

        let archive = ArchiveLoader::open(&path).expect("open");
        assert_eq!(archive.name(), "lib");
        assert_eq!(archive.member_names(), vec!["lib.A", "lib.B"]);
        assert_eq!(archive.load_member("lib.B").expect("load").name(), "lib.B");
        assert!(matches!(
            archive.load_member("lib.C"),
            Err(LoaderError::NameNotFound { .. })
        ));
    }

    #[test]
    fn test_tampered_digest_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lib.json");
        write_archive(&path, "lib", [artifact("lib.A")].iter()).expect("write");

        let mut json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        json["artifacts"][0]["digest"] = serde_json::Value::String("00".repeat(32));
        fs::write(&path, json.to_string()).expect("rewrite");

        let err = ArchiveLoader::open(&path).err().expect("tampered archive must fail");
        let text = format!("{:#}", err);
        assert!(text.contains("digest mismatch"), "{}", text);
        assert!(text.contains("member lib.A"), "{}", text);
    }

    #[test]
    fn test_missing_file_has_path_context() {
        let err = ArchiveLoader::open(Path::new("/nonexistent/lib.json"))
            .err()
            .expect("missing file must fail");
        assert!(err.to_string().contains("/nonexistent/lib.json"));
    }

    #[test]
    fn test_library_path_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        write_archive(&first, "first", [artifact("lib.A")].iter()).expect("write");
        write_archive(&second, "second", [artifact("lib.A"), artifact("lib.B")].iter()).expect("write");

        let path = LibraryPath::new();
        path.push(ArchiveLoader::open(&first).expect("open"));
        path.push(ArchiveLoader::open(&second).expect("open"));

        let a = path.resolve("lib.A").expect("a");
        assert_eq!(a.loader().label(), "archive:first");
        let b = path.resolve("lib.B").expect("b");
        assert_eq!(b.loader().label(), "archive:second");
        match path.resolve("lib.Z") {
            Err(LoaderError::NameNotFound { searched, .. }) => {
                assert_eq!(searched, vec!["archive:first", "archive:second"]);
            }
            _ => panic!("expected NameNotFound"),
        }
    }
}
