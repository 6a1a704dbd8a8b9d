//! Pack Versioning Store: numbered snapshots of a pack's flow and manifest.
//!
//! Append-only numbered snapshots of a pack's `taskpack.json` + `flow.json`,
//! with bounded retention and atomic manifest writes, laid out under
//! `<pack_dir>/.versions/`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionSource {
    Cli,
    Dashboard,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowVersion {
    pub number: u64,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub label: Option<String>,
    pub source: VersionSource,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionManifest {
    #[serde(default)]
    pub versions: Vec<FlowVersion>,
    #[serde(default = "default_max_versions")]
    pub max_versions: u64,
}

fn default_max_versions() -> u64 {
    50
}

impl Default for VersionManifest {
    fn default() -> Self {
        Self {
            versions: vec![],
            max_versions: default_max_versions(),
        }
    }
}

pub struct SaveOptions {
    pub label: Option<String>,
    pub source: VersionSource,
    pub conversation_id: Option<String>,
}

fn versions_dir(pack_dir: &Path) -> PathBuf {
    pack_dir.join(".versions")
}

fn manifest_path(pack_dir: &Path) -> PathBuf {
    versions_dir(pack_dir).join("manifest.json")
}

fn numbered_flow_path(pack_dir: &Path, n: u64) -> PathBuf {
    versions_dir(pack_dir).join(format!("{}.flow.json", n))
}

fn numbered_taskpack_path(pack_dir: &Path, n: u64) -> PathBuf {
    versions_dir(pack_dir).join(format!("{}.taskpack.json", n))
}

fn live_flow_path(pack_dir: &Path) -> PathBuf {
    pack_dir.join("flow.json")
}

fn live_taskpack_path(pack_dir: &Path) -> PathBuf {
    pack_dir.join("taskpack.json")
}

fn load_manifest(pack_dir: &Path) -> EngineResult<VersionManifest> {
    let path = manifest_path(pack_dir);
    match fs::read_to_string(&path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VersionManifest::default()),
        Err(e) => Err(e.into()),
    }
}

fn write_manifest(pack_dir: &Path, manifest: &VersionManifest) -> EngineResult<()> {
    fs::create_dir_all(versions_dir(pack_dir))?;
    let contents = serde_json::to_string_pretty(manifest)?;
    atomic_write(&manifest_path(pack_dir), contents.as_bytes())
}

fn atomic_write(path: &Path, contents: &[u8]) -> EngineResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Manifest-declared `version` string, read directly from `taskpack.json`
/// without going through the full `TaskPack` parser (versioning does not
/// care about `kind` or flow contents).
fn read_manifest_version(taskpack_json: &str) -> EngineResult<String> {
    let value: serde_json::Value = serde_json::from_str(taskpack_json)?;
    value
        .get("version")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| EngineError::Validation("taskpack.json missing 'version' field".to_string()))
}

/// Save a new numbered snapshot of the pack's current `taskpack.json` +
/// `flow.json`, pruning oldest versions beyond `maxVersions`.
pub fn save_version(pack_dir: &Path, opts: SaveOptions) -> EngineResult<FlowVersion> {
    let flow_path = live_flow_path(pack_dir);
    let taskpack_path = live_taskpack_path(pack_dir);

    let flow_contents = fs::read_to_string(&flow_path)
        .map_err(|_| EngineError::Validation("flow.json missing; cannot save version".to_string()))?;
    let taskpack_contents = fs::read_to_string(&taskpack_path)
        .map_err(|_| EngineError::Validation("taskpack.json missing; cannot save version".to_string()))?;

    let mut manifest = load_manifest(pack_dir)?;
    let number = manifest.versions.iter().map(|v| v.number).max().unwrap_or(0) + 1;

    fs::create_dir_all(versions_dir(pack_dir))?;
    fs::write(numbered_flow_path(pack_dir, number), &flow_contents)?;
    fs::write(numbered_taskpack_path(pack_dir, number), &taskpack_contents)?;

    let version = FlowVersion {
        number,
        version: read_manifest_version(&taskpack_contents)?,
        timestamp: chrono::Utc::now(),
        label: opts.label,
        source: opts.source,
        conversation_id: opts.conversation_id,
    };
    manifest.versions.push(version.clone());

    prune(pack_dir, &mut manifest);
    write_manifest(pack_dir, &manifest)?;

    Ok(version)
}

/// Prune oldest versions until `|versions| <= max_versions`. Best-effort:
/// file deletion failures (already-missing files) are ignored.
fn prune(pack_dir: &Path, manifest: &mut VersionManifest) {
    manifest.versions.sort_by_key(|v| v.number);
    while manifest.versions.len() as u64 > manifest.max_versions {
        let removed = manifest.versions.remove(0);
        let _ = fs::remove_file(numbered_flow_path(pack_dir, removed.number));
        let _ = fs::remove_file(numbered_taskpack_path(pack_dir, removed.number));
    }
}

/// Restore version `n`: auto-save the current state first (so it is never
/// lost), then copy the versioned files back over the live ones.
pub fn restore_version(pack_dir: &Path, n: u64) -> EngineResult<FlowVersion> {
    let manifest = load_manifest(pack_dir)?;
    if !manifest.versions.iter().any(|v| v.number == n) {
        return Err(EngineError::Validation(format!("version {} does not exist", n)));
    }

    save_version(
        pack_dir,
        SaveOptions {
            label: Some(format!("Auto-saved before restoring version {}", n)),
            source: VersionSource::Dashboard,
            conversation_id: None,
        },
    )?;

    let flow_contents = fs::read_to_string(numbered_flow_path(pack_dir, n))?;
    fs::write(live_flow_path(pack_dir), flow_contents)?;

    let restored = manifest.versions.into_iter().find(|v| v.number == n).unwrap();

    let taskpack_src = numbered_taskpack_path(pack_dir, n);
    if taskpack_src.exists() {
        let taskpack_contents = fs::read_to_string(&taskpack_src)?;
        fs::write(live_taskpack_path(pack_dir), taskpack_contents)?;
    }

    Ok(restored)
}

/// List all saved versions, oldest first. Performs no mutation.
pub fn list_versions(pack_dir: &Path) -> EngineResult<Vec<FlowVersion>> {
    let mut manifest = load_manifest(pack_dir)?;
    manifest.versions.sort_by_key(|v| v.number);
    Ok(manifest.versions)
}

pub struct VersionFiles {
    pub flow: serde_json::Value,
    /// `None` for legacy versions saved before `taskpack.json` was versioned.
    pub taskpack: Option<serde_json::Value>,
}

/// Read back the raw file contents for version `n`. Performs no mutation.
/// Tolerant of a missing versioned `taskpack.json` (legacy compatibility).
pub fn get_version_files(pack_dir: &Path, n: u64) -> EngineResult<VersionFiles> {
    let flow_contents = fs::read_to_string(numbered_flow_path(pack_dir, n))
        .map_err(|_| EngineError::Validation(format!("version {} flow.json not found", n)))?;
    let flow: serde_json::Value = serde_json::from_str(&flow_contents)?;

    let taskpack = match fs::read_to_string(numbered_taskpack_path(pack_dir, n)) {
        Ok(contents) => Some(serde_json::from_str(&contents)?),
        Err(_) => None,
    };

    Ok(VersionFiles { flow, taskpack })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed_pack(dir: &Path, version: &str) {
        fs::write(
            dir.join("taskpack.json"),
            format!(r#"{{"id":"p","name":"p","version":"{}","kind":"json-dsl"}}"#, version),
        )
        .unwrap();
        fs::write(dir.join("flow.json"), r#"{"flow":[]}"#).unwrap();
    }

    #[test]
    fn save_version_numbers_monotonically() {
        let dir = tempdir().unwrap();
        seed_pack(dir.path(), "1.0.0");
        let opts = || SaveOptions {
            label: None,
            source: VersionSource::Cli,
            conversation_id: None,
        };
        let v1 = save_version(dir.path(), opts()).unwrap();
        let v2 = save_version(dir.path(), opts()).unwrap();
        assert_eq!(v1.number, 1);
        assert_eq!(v2.number, 2);
    }

    #[test]
    fn prunes_to_max_versions() {
        let dir = tempdir().unwrap();
        seed_pack(dir.path(), "1.0.0");
        let mut manifest = load_manifest(dir.path()).unwrap();
        manifest.max_versions = 3;
        write_manifest(dir.path(), &manifest).unwrap();

        for _ in 0..5 {
            save_version(
                dir.path(),
                SaveOptions {
                    label: None,
                    source: VersionSource::Cli,
                    conversation_id: None,
                },
            )
            .unwrap();
        }

        let versions = list_versions(dir.path()).unwrap();
        let numbers: Vec<u64> = versions.iter().map(|v| v.number).collect();
        assert_eq!(numbers, vec![3, 4, 5]);
        assert!(!numbered_flow_path(dir.path(), 1).exists());
        assert!(!numbered_flow_path(dir.path(), 2).exists());
    }

    #[test]
    fn restore_version_copies_files_back_and_autosaves() {
        let dir = tempdir().unwrap();
        seed_pack(dir.path(), "1.0.0");
        save_version(
            dir.path(),
            SaveOptions {
                label: None,
                source: VersionSource::Cli,
                conversation_id: None,
            },
        )
        .unwrap();

        fs::write(dir.path().join("flow.json"), r#"{"flow":[{"id":"changed"}]}"#).unwrap();

        restore_version(dir.path(), 1).unwrap();

        let restored_flow = fs::read_to_string(dir.path().join("flow.json")).unwrap();
        assert_eq!(restored_flow, r#"{"flow":[]}"#);

        let versions = list_versions(dir.path()).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(
            versions[1].label.as_deref(),
            Some("Auto-saved before restoring version 1")
        );
    }

    #[test]
    fn get_version_files_tolerates_missing_taskpack() {
        let dir = tempdir().unwrap();
        seed_pack(dir.path(), "1.0.0");
        let v = save_version(
            dir.path(),
            SaveOptions {
                label: None,
                source: VersionSource::Cli,
                conversation_id: None,
            },
        )
        .unwrap();
        fs::remove_file(numbered_taskpack_path(dir.path(), v.number)).unwrap();

        let files = get_version_files(dir.path(), v.number).unwrap();
        assert!(files.taskpack.is_none());
    }
}
