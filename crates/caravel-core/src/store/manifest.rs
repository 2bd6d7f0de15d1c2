//! Per-entity manifest: the index kept beside each stored entity's files.
//!
//! The directory tree is the source of truth; the manifest is a cache of
//! fingerprints so overwrite/skip decisions and push enumeration don't
//! have to re-hash everything. A missing or stale manifest is re-derived
//! by the store's rescan.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::{CaravelError, Result};
use crate::locator::EntityKind;
use crate::resources::ResourceType;
use crate::store::atomic::{atomic_read_json, atomic_write_json};

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Hashing buffer size for rescans.
const HASH_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Identity of the entity a manifest describes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub kind: EntityKind,
    /// Stable id on the source backend.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub workspace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Adapter name the entity was pulled from.
    pub source_backend: String,
    /// Canonical source path, e.g. `team/vision/abc123`.
    pub source_path: String,
}

/// One stored file with its content fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    /// Path relative to the entity directory.
    pub path: String,
    pub size: u64,
    pub blake3: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Everything recorded for one resource type of one entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub files: Vec<ManifestFile>,
    pub fetched_at: DateTime<Utc>,
}

/// Compact answer to "is this resource already stored, and as what".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFingerprint {
    pub file_count: usize,
    pub total_bytes: u64,
    pub fetched_at: DateTime<Utc>,
}

/// The manifest file serialized as `manifest.json` in each entity dir.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntityManifest {
    pub schema_version: u32,
    pub entity: EntityRecord,
    #[serde(default)]
    pub resources: BTreeMap<ResourceType, ResourceRecord>,
}

impl EntityManifest {
    pub fn new(entity: EntityRecord) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            entity,
            resources: BTreeMap::new(),
        }
    }

    pub fn manifest_path(entity_dir: &Path) -> PathBuf {
        entity_dir.join(StoreConfig::MANIFEST_FILENAME)
    }

    /// Load the manifest from an entity directory, if one exists.
    pub fn load(entity_dir: &Path) -> Result<Option<EntityManifest>> {
        atomic_read_json(&Self::manifest_path(entity_dir))
    }

    /// Persist atomically into the entity directory.
    pub fn save(&self, entity_dir: &Path) -> Result<()> {
        atomic_write_json(&Self::manifest_path(entity_dir), self)
    }

    /// Record (or replace) the file set for one resource type.
    pub fn record_resource(&mut self, resource: ResourceType, files: Vec<ManifestFile>) {
        self.resources.insert(
            resource,
            ResourceRecord {
                files,
                fetched_at: Utc::now(),
            },
        );
    }

    pub fn resource_fingerprint(&self, resource: ResourceType) -> Option<ResourceFingerprint> {
        self.resources.get(&resource).map(|record| ResourceFingerprint {
            file_count: record.files.len(),
            total_bytes: record.files.iter().map(|f| f.size).sum(),
            fetched_at: record.fetched_at,
        })
    }

    /// Resource types recorded for this entity, in stable order.
    pub fn recorded_resources(&self) -> Vec<ResourceType> {
        self.resources.keys().copied().collect()
    }

    pub fn files_for(&self, resource: ResourceType) -> Option<&[ManifestFile]> {
        self.resources.get(&resource).map(|r| r.files.as_slice())
    }
}

/// Fingerprint an in-memory payload: (size, blake3 hex).
pub fn fingerprint_bytes(data: &[u8]) -> (u64, String) {
    let digest = blake3::hash(data);
    (data.len() as u64, digest.to_hex().to_string())
}

/// Fingerprint a file on disk without loading it whole.
pub fn hash_file(path: &Path) -> Result<(u64, String)> {
    let mut file = File::open(path).map_err(|e| CaravelError::io_with_path(e, path))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| CaravelError::io_with_path(e, path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }

    Ok((total, hasher.finalize().to_hex().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::EntityKind;
    use tempfile::TempDir;

    fn sample_record() -> EntityRecord {
        EntityRecord {
            kind: EntityKind::Experiment,
            id: "abc123".into(),
            name: Some("warm-start".into()),
            workspace: "team".into(),
            project: Some("vision".into()),
            source_backend: "native".to_string(),
            source_path: "team/vision/abc123".into(),
        }
    }

    #[test]
    fn test_manifest_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let mut manifest = EntityManifest::new(sample_record());
        let (size, hash) = fingerprint_bytes(b"{\"lr\": 0.01}");
        manifest.record_resource(
            ResourceType::Parameters,
            vec![ManifestFile {
                path: "parameters/parameters.json".into(),
                size,
                blake3: hash,
                sha256: None,
            }],
        );

        manifest.save(temp_dir.path()).unwrap();
        let loaded = EntityManifest::load(temp_dir.path()).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.schema_version, MANIFEST_SCHEMA_VERSION);
    }

    #[test]
    fn test_load_missing_manifest() {
        let temp_dir = TempDir::new().unwrap();
        assert!(EntityManifest::load(temp_dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_fingerprint_reflects_recorded_files() {
        let mut manifest = EntityManifest::new(sample_record());
        assert!(manifest.resource_fingerprint(ResourceType::Metrics).is_none());

        manifest.record_resource(
            ResourceType::Metrics,
            vec![
                ManifestFile {
                    path: "metrics/metrics.jsonl".into(),
                    size: 120,
                    blake3: "aa".into(),
                    sha256: None,
                },
                ManifestFile {
                    path: "metrics/extra.jsonl".into(),
                    size: 30,
                    blake3: "bb".into(),
                    sha256: None,
                },
            ],
        );

        let fp = manifest.resource_fingerprint(ResourceType::Metrics).unwrap();
        assert_eq!(fp.file_count, 2);
        assert_eq!(fp.total_bytes, 150);
    }

    #[test]
    fn test_record_resource_replaces() {
        let mut manifest = EntityManifest::new(sample_record());
        manifest.record_resource(ResourceType::Output, vec![]);
        manifest.record_resource(
            ResourceType::Output,
            vec![ManifestFile {
                path: "output/output.txt".into(),
                size: 5,
                blake3: "cc".into(),
                sha256: None,
            }],
        );
        assert_eq!(manifest.files_for(ResourceType::Output).unwrap().len(), 1);
        assert_eq!(manifest.recorded_resources(), vec![ResourceType::Output]);
    }

    #[test]
    fn test_hash_file_matches_bytes_fingerprint() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blob.bin");
        let content = b"the quick brown fox";
        std::fs::write(&path, content).unwrap();

        let from_disk = hash_file(&path).unwrap();
        let from_memory = fingerprint_bytes(content);
        assert_eq!(from_disk, from_memory);
    }

    #[test]
    fn test_hash_file_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let (size, hash) = hash_file(&path).unwrap();
        assert_eq!(size, 0);
        assert_eq!(
            hash,
            "af1349b9f5f9a1a6a0404dee36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }
}
