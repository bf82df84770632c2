//! Model registry capability and its adapters.
//!
//! A registry holds numbered versions of one registered model, named aliases pointing at
//! versions, and opaque artifact blobs addressed by `(version, path)`.

use crate::error::{PipelineError, PipelineResult};
use crate::types::artifact::{paths, ArtifactProfile, CategoricalEncoder, SchemaArtifact};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const ALIASES_FILE: &str = "aliases.json";
const VERSIONS_DIR: &str = "versions";

/// Versioned artifact store scoped to one registered model.
pub trait ModelRegistry: Send + Sync {
    /// Registered version numbers, ascending
    fn list_versions(&self) -> PipelineResult<Vec<u64>>;

    fn get_version_by_alias(&self, alias: &str) -> PipelineResult<Option<u64>>;

    /// Point `alias` at `version`. Readers see either the old or the new target.
    fn set_alias(&self, alias: &str, version: u64) -> PipelineResult<()>;

    fn download_artifact(&self, version: u64, path: &str) -> PipelineResult<Vec<u8>>;

    fn upload_artifact(&self, version: u64, path: &str, bytes: &[u8]) -> PipelineResult<()>;
}

/// Download and decode a JSON artifact
pub fn fetch_json<T: DeserializeOwned>(
    registry: &dyn ModelRegistry,
    version: u64,
    path: &str,
) -> PipelineResult<T> {
    let bytes = registry.download_artifact(version, path)?;
    serde_json::from_slice(&bytes).map_err(|e| PipelineError::MalformedArtifact {
        version,
        artifact: path.to_string(),
        detail: e.to_string(),
    })
}

/// Encode and upload a JSON artifact
pub fn put_json<T: Serialize>(
    registry: &dyn ModelRegistry,
    version: u64,
    path: &str,
    value: &T,
) -> PipelineResult<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| PipelineError::Registry(format!("failed to encode {path}: {e}")))?;
    registry.upload_artifact(version, path, &bytes)
}

/// Assemble a version's profile from its schema and encoder artifacts
pub fn load_profile(registry: &dyn ModelRegistry, version: u64) -> PipelineResult<ArtifactProfile> {
    let schema: SchemaArtifact = fetch_json(registry, version, paths::SCHEMA)?;
    let encoder: CategoricalEncoder = fetch_json(registry, version, paths::ENCODERS)?;
    ArtifactProfile::from_artifacts(version, schema, encoder)
}

/// Filesystem registry.
///
/// Layout: `<root>/<model>/versions/<version>/<artifact path>` and
/// `<root>/<model>/aliases.json`. The alias file is replaced by rename.
#[derive(Debug, Clone)]
pub struct FsRegistry {
    model_dir: PathBuf,
}

impl FsRegistry {
    pub fn new<P: AsRef<Path>>(root: P, model_name: &str) -> Self {
        Self {
            model_dir: root.as_ref().join(model_name),
        }
    }

    fn version_dir(&self, version: u64) -> PathBuf {
        self.model_dir.join(VERSIONS_DIR).join(version.to_string())
    }

    fn artifact_path(&self, version: u64, path: &str) -> PipelineResult<PathBuf> {
        let relative = Path::new(path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(PipelineError::Registry(format!(
                "artifact path '{path}' escapes the version directory"
            )));
        }
        Ok(self.version_dir(version).join(relative))
    }

    fn read_aliases(&self) -> PipelineResult<BTreeMap<String, u64>> {
        let path = self.model_dir.join(ALIASES_FILE);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                PipelineError::Registry(format!("corrupt alias file {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

fn io_error(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::Registry(format!("{}: {e}", path.display()))
}

impl ModelRegistry for FsRegistry {
    fn list_versions(&self) -> PipelineResult<Vec<u64>> {
        let dir = self.model_dir.join(VERSIONS_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, e)),
        };

        let mut versions: Vec<u64> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse().ok()))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    fn get_version_by_alias(&self, alias: &str) -> PipelineResult<Option<u64>> {
        Ok(self.read_aliases()?.get(alias).copied())
    }

    fn set_alias(&self, alias: &str, version: u64) -> PipelineResult<()> {
        if !self.version_dir(version).is_dir() {
            return Err(PipelineError::Registry(format!(
                "cannot alias '{alias}' to unknown version {version}"
            )));
        }

        let mut aliases = self.read_aliases()?;
        aliases.insert(alias.to_string(), version);

        let bytes = serde_json::to_vec_pretty(&aliases)
            .map_err(|e| PipelineError::Registry(e.to_string()))?;
        let target = self.model_dir.join(ALIASES_FILE);
        let staging = self.model_dir.join(format!(".{ALIASES_FILE}.tmp"));
        fs::write(&staging, bytes).map_err(|e| io_error(&staging, e))?;
        fs::rename(&staging, &target).map_err(|e| io_error(&target, e))?;

        debug!(alias = %alias, version = version, "Alias updated");
        Ok(())
    }

    fn download_artifact(&self, version: u64, path: &str) -> PipelineResult<Vec<u8>> {
        let full = self.artifact_path(version, path)?;
        match fs::read(&full) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(PipelineError::ArtifactMissing {
                version,
                artifact: path.to_string(),
            }),
            Err(e) => Err(io_error(&full, e)),
        }
    }

    fn upload_artifact(&self, version: u64, path: &str, bytes: &[u8]) -> PipelineResult<()> {
        let full = self.artifact_path(version, path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        fs::write(&full, bytes).map_err(|e| io_error(&full, e))?;

        debug!(version = version, artifact = %path, bytes = bytes.len(), "Artifact uploaded");
        Ok(())
    }
}

/// In-process registry, used by tests and embedded setups
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    artifacts: RwLock<BTreeMap<u64, HashMap<String, Vec<u8>>>>,
    aliases: RwLock<HashMap<String, u64>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelRegistry for InMemoryRegistry {
    fn list_versions(&self) -> PipelineResult<Vec<u64>> {
        Ok(self.artifacts.read().keys().copied().collect())
    }

    fn get_version_by_alias(&self, alias: &str) -> PipelineResult<Option<u64>> {
        Ok(self.aliases.read().get(alias).copied())
    }

    fn set_alias(&self, alias: &str, version: u64) -> PipelineResult<()> {
        if !self.artifacts.read().contains_key(&version) {
            return Err(PipelineError::Registry(format!(
                "cannot alias '{alias}' to unknown version {version}"
            )));
        }
        self.aliases.write().insert(alias.to_string(), version);
        Ok(())
    }

    fn download_artifact(&self, version: u64, path: &str) -> PipelineResult<Vec<u8>> {
        self.artifacts
            .read()
            .get(&version)
            .and_then(|files| files.get(path))
            .cloned()
            .ok_or_else(|| PipelineError::ArtifactMissing {
                version,
                artifact: path.to_string(),
            })
    }

    fn upload_artifact(&self, version: u64, path: &str, bytes: &[u8]) -> PipelineResult<()> {
        self.artifacts
            .write()
            .entry(version)
            .or_default()
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::artifact::ThresholdArtifact;

    fn exercise(registry: &dyn ModelRegistry) {
        assert!(registry.list_versions().unwrap().is_empty());
        assert_eq!(registry.get_version_by_alias("production").unwrap(), None);

        registry.upload_artifact(2, paths::MODEL, b"onnx-bytes").unwrap();
        registry.upload_artifact(10, paths::MODEL, b"onnx-bytes-2").unwrap();
        registry.upload_artifact(1, paths::MODEL, b"onnx-bytes-0").unwrap();
        assert_eq!(registry.list_versions().unwrap(), vec![1, 2, 10]);

        assert_eq!(registry.download_artifact(2, paths::MODEL).unwrap(), b"onnx-bytes");
        assert!(matches!(
            registry.download_artifact(2, paths::SCHEMA),
            Err(PipelineError::ArtifactMissing { version: 2, .. })
        ));

        registry.set_alias("production", 2).unwrap();
        registry.set_alias("production", 10).unwrap();
        assert_eq!(registry.get_version_by_alias("production").unwrap(), Some(10));
        assert!(registry.set_alias("production", 99).is_err());
        assert_eq!(registry.get_version_by_alias("production").unwrap(), Some(10));

        let thresholds = ThresholdArtifact {
            model_version: "v10".to_string(),
            threshold_low: 0.2,
            threshold_high: None,
            fpr_cap: 0.01,
        };
        put_json(registry, 10, paths::THRESHOLDS, &thresholds).unwrap();
        let back: ThresholdArtifact = fetch_json(registry, 10, paths::THRESHOLDS).unwrap();
        assert_eq!(back, thresholds);

        registry.upload_artifact(10, paths::SCHEMA, b"{not json").unwrap();
        let malformed: PipelineResult<ThresholdArtifact> = fetch_json(registry, 10, paths::SCHEMA);
        assert!(matches!(
            malformed,
            Err(PipelineError::MalformedArtifact { version: 10, .. })
        ));
    }

    #[test]
    fn test_in_memory_registry() {
        exercise(&InMemoryRegistry::new());
    }

    #[test]
    fn test_fs_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FsRegistry::new(dir.path(), "fraud-rf");
        exercise(&registry);

        assert!(dir
            .path()
            .join("fraud-rf/versions/10/artifacts/thresholds.json")
            .is_file());
        assert!(!dir.path().join("fraud-rf/.aliases.json.tmp").exists());

        // a second handle over the same root sees the same state
        let reopened = FsRegistry::new(dir.path(), "fraud-rf");
        assert_eq!(reopened.get_version_by_alias("production").unwrap(), Some(10));
    }

    #[test]
    fn test_fs_registry_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FsRegistry::new(dir.path(), "fraud-rf");
        assert!(matches!(
            registry.upload_artifact(1, "../../outside.json", b"{}"),
            Err(PipelineError::Registry(_))
        ));
    }
}
