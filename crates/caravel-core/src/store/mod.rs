//! Local store: the on-disk, re-scannable representation of pulled
//! entities.
//!
//! This module provides:
//! - Layout mapping (hierarchical or flat) and id-or-name entity naming
//! - Atomic payload and manifest writes
//! - Per-entity write serialization for concurrent pipeline workers
//! - Enumeration and rescan, which is what the push pipeline consumes
//!
//! The directory tree is the source of truth; `manifest.json` files are a
//! fingerprint cache that [`LocalStore::rescan_entity`] can always rebuild.

mod atomic;
mod manifest;

pub use atomic::{atomic_read_json, atomic_write_json};
pub use manifest::{
    fingerprint_bytes, hash_file, EntityManifest, EntityRecord, ManifestFile, ResourceFingerprint,
    ResourceRecord, MANIFEST_SCHEMA_VERSION,
};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::backend::{ResourceFile, ResourcePayload};
use crate::config::StoreConfig;
use crate::error::{CaravelError, Result};
use crate::locator::{EntityKind, Locator};
use crate::resources::ResourceType;

/// How entity files are arranged under the store root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutMode {
    /// `workspace/project/experiment/resourceType/...`
    #[default]
    Nested,
    /// One directory per entity, files named `resourceType-resourceName`.
    Flat,
}

/// What names entity directories carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingMode {
    /// Stable backend ids. Never collides.
    #[default]
    ById,
    /// Display names, falling back to the id; colliding names are
    /// disambiguated with an id suffix.
    ByName,
}

/// One entity found in the store, with its manifest.
#[derive(Debug, Clone)]
pub struct StoredEntity {
    pub dir: PathBuf,
    pub manifest: EntityManifest,
}

impl StoredEntity {
    /// Whether this entity falls under a source selector locator. A
    /// project selector covers the project container itself, so its
    /// notes and metadata travel with its experiments.
    pub fn matches(&self, source: &Locator) -> bool {
        let entity = &self.manifest.entity;
        match source {
            Locator::Workspace { workspace } => entity.workspace == *workspace,
            Locator::Project { workspace, project } => {
                if entity.workspace != *workspace {
                    return false;
                }
                if entity.kind == EntityKind::Project {
                    entity.name.as_deref() == Some(project) || entity.id == *project
                } else {
                    entity.project.as_deref() == Some(project)
                }
            }
            Locator::Experiment {
                workspace,
                project,
                experiment,
            } => {
                entity.workspace == *workspace
                    && entity.project.as_deref() == Some(project)
                    && (entity.id == *experiment || entity.name.as_deref() == Some(experiment))
            }
            _ => false,
        }
    }
}

/// The on-disk store for one output root.
///
/// Writes to a single entity are serialized; writers to different
/// entities never contend. All IO here is synchronous by design, so no
/// lock is ever held across an await point.
pub struct LocalStore {
    root: PathBuf,
    layout: LayoutMode,
    naming: NamingMode,
    /// One lock per entity directory.
    entity_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    /// Guards name-collision resolution while a directory is claimed.
    naming_lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(
        root: impl Into<PathBuf>,
        layout: LayoutMode,
        naming: NamingMode,
    ) -> Result<LocalStore> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| CaravelError::io_with_path(e, &root))?;
        Ok(LocalStore {
            root,
            layout,
            naming,
            entity_locks: Mutex::new(HashMap::new()),
            naming_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory reserved for engine state (sync watermarks and the like).
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(StoreConfig::STATE_DIR_NAME)
    }

    // ========================================
    // Entity directory resolution
    // ========================================

    /// Resolve and claim the directory for an entity, creating it and an
    /// initial manifest if this entity has not been stored before.
    ///
    /// Two different entities never resolve to the same directory: a
    /// display-name collision (or a name that shadows a reserved file
    /// name) gets the stable id appended.
    pub fn prepare_entity(&self, record: &EntityRecord) -> Result<PathBuf> {
        let parent = self.entity_parent_dir(record)?;
        let base = self.entity_base_name(record);

        let _guard = self
            .naming_lock
            .lock()
            .map_err(|_| poisoned("naming lock"))?;

        let dir = self.disambiguate(&parent, &base, record)?;
        if EntityManifest::load(&dir)?.is_none() {
            fs::create_dir_all(&dir).map_err(|e| CaravelError::io_with_path(e, &dir))?;
            EntityManifest::new(record.clone()).save(&dir)?;
            debug!("Claimed entity directory {}", dir.display());
        }
        Ok(dir)
    }

    fn entity_parent_dir(&self, record: &EntityRecord) -> Result<PathBuf> {
        if self.layout == LayoutMode::Flat {
            return Ok(self.root.clone());
        }
        let ws = sanitize_component(&record.workspace);
        Ok(match record.kind {
            EntityKind::Project => self.root.join(ws),
            EntityKind::Experiment => {
                let project = record.project.as_deref().unwrap_or("_");
                self.root.join(ws).join(sanitize_component(project))
            }
            EntityKind::ArtifactVersion | EntityKind::ModelVersion => {
                // The collection name sits in the canonical source path
                match Locator::parse(&record.source_path) {
                    Ok(Locator::ArtifactVersion { name, .. }) => self
                        .root
                        .join(ws)
                        .join("artifacts")
                        .join(sanitize_component(&name)),
                    Ok(Locator::ModelVersion { name, .. }) => self
                        .root
                        .join(ws)
                        .join("model-registry")
                        .join(sanitize_component(&name)),
                    _ => self.root.join(ws),
                }
            }
            _ => self.root.join(ws),
        })
    }

    fn entity_base_name(&self, record: &EntityRecord) -> String {
        let display = record.name.as_deref().unwrap_or(&record.id);
        let raw = match record.kind {
            // Projects and versions are addressed by display name on every
            // vendor; the id/name switch exists for experiments.
            EntityKind::Project
            | EntityKind::ArtifactVersion
            | EntityKind::ModelVersion => display,
            _ => match self.naming {
                NamingMode::ById => &record.id,
                NamingMode::ByName => display,
            },
        };
        let mut base = sanitize_component(raw);
        if self.layout == LayoutMode::Flat && record.kind != EntityKind::Project {
            // Flat roots mix every entity; qualify versions with their
            // collection so `2.0.0` of two artifacts cannot meet.
            if let Ok(
                Locator::ArtifactVersion { name, .. } | Locator::ModelVersion { name, .. },
            ) = Locator::parse(&record.source_path)
            {
                base = format!("{}-{}", sanitize_component(&name), base);
            }
        }
        base
    }

    fn disambiguate(&self, parent: &Path, base: &str, record: &EntityRecord) -> Result<PathBuf> {
        let trouble = is_reserved_name(base) || {
            let plain = parent.join(base);
            match EntityManifest::load(&plain)? {
                Some(existing) => existing.entity.id != record.id,
                None => plain.is_file(),
            }
        };
        if trouble {
            Ok(parent.join(suffixed(base, &record.id)))
        } else {
            Ok(parent.join(base))
        }
    }

    // ========================================
    // Resource IO
    // ========================================

    /// Fingerprint of a stored resource, or `None` when absent.
    pub fn has(&self, entity_dir: &Path, resource: ResourceType) -> Result<Option<ResourceFingerprint>> {
        let lock = self.entity_lock(entity_dir)?;
        let _guard = lock.lock().map_err(|_| poisoned("entity lock"))?;
        Ok(EntityManifest::load(entity_dir)?
            .and_then(|m| m.resource_fingerprint(resource)))
    }

    /// Write one resource payload and record it in the entity manifest.
    ///
    /// Every file is staged and renamed; the manifest is updated last, so
    /// a crash can leave orphaned payload files but never a manifest entry
    /// pointing at missing data.
    pub fn write_resource(
        &self,
        entity_dir: &Path,
        resource: ResourceType,
        payload: &ResourcePayload,
    ) -> Result<Vec<ManifestFile>> {
        let lock = self.entity_lock(entity_dir)?;
        let _guard = lock.lock().map_err(|_| poisoned("entity lock"))?;

        let mut recorded = Vec::with_capacity(payload.files.len());
        for file in &payload.files {
            let rel = self.stored_rel_path(resource, &file.rel_path);
            let target = entity_dir.join(&rel);
            atomic::atomic_write_bytes(&target, &file.bytes)?;
            let (size, blake3) = fingerprint_bytes(&file.bytes);
            recorded.push(ManifestFile {
                path: rel,
                size,
                blake3,
                sha256: file.declared_sha256.clone(),
            });
        }

        let mut manifest = EntityManifest::load(entity_dir)?.ok_or_else(|| {
            CaravelError::Store {
                message: format!("{} has no manifest; prepare_entity first", entity_dir.display()),
            }
        })?;
        manifest.record_resource(resource, recorded.clone());
        manifest.save(entity_dir)?;
        Ok(recorded)
    }

    /// Read one recorded resource back as a payload, for pushing.
    pub fn read_resource(
        &self,
        entity_dir: &Path,
        resource: ResourceType,
    ) -> Result<ResourcePayload> {
        let lock = self.entity_lock(entity_dir)?;
        let _guard = lock.lock().map_err(|_| poisoned("entity lock"))?;

        let manifest = EntityManifest::load(entity_dir)?.ok_or_else(|| CaravelError::Store {
            message: format!("{} has no manifest", entity_dir.display()),
        })?;
        let files = manifest
            .files_for(resource)
            .ok_or_else(|| CaravelError::NotFound {
                what: format!("{} in {}", resource, entity_dir.display()),
            })?;

        let mut payload = ResourcePayload::default();
        for file in files {
            let path = entity_dir.join(&file.path);
            let bytes = fs::read(&path).map_err(|e| CaravelError::io_with_path(e, &path))?;
            let mut rf = ResourceFile::new(self.payload_rel_path(resource, &file.path), bytes);
            if let Some(sha) = &file.sha256 {
                rf = rf.with_sha256(sha.clone());
            }
            payload.files.push(rf);
        }
        Ok(payload)
    }

    fn stored_rel_path(&self, resource: ResourceType, payload_rel: &str) -> String {
        let clean = sanitize_rel_path(payload_rel);
        match self.layout {
            LayoutMode::Nested => format!("{}/{}", resource.dir_name(), clean),
            LayoutMode::Flat => format!("{}-{}", resource.dir_name(), clean.replace('/', "-")),
        }
    }

    fn payload_rel_path(&self, resource: ResourceType, stored_rel: &str) -> String {
        let prefix = match self.layout {
            LayoutMode::Nested => format!("{}/", resource.dir_name()),
            LayoutMode::Flat => format!("{}-", resource.dir_name()),
        };
        stored_rel
            .strip_prefix(&prefix)
            .unwrap_or(stored_rel)
            .to_string()
    }

    // ========================================
    // Enumeration and rescan
    // ========================================

    /// Every entity recorded under the root, in path order.
    pub fn list_entities(&self) -> Result<Vec<StoredEntity>> {
        let state_dir = self.state_dir();
        let mut found = Vec::new();

        for entry in WalkDir::new(&self.root).into_iter().filter_entry(|e| {
            e.path() != state_dir
        }) {
            let entry = entry.map_err(|e| CaravelError::Store {
                message: format!("Walk failed under {}: {}", self.root.display(), e),
            })?;
            if entry.file_type().is_file()
                && entry.file_name() == StoreConfig::MANIFEST_FILENAME
            {
                let dir = entry
                    .path()
                    .parent()
                    .unwrap_or(&self.root)
                    .to_path_buf();
                match EntityManifest::load(&dir)? {
                    Some(manifest) => found.push(StoredEntity { dir, manifest }),
                    None => warn!("Unreadable manifest under {}", dir.display()),
                }
            }
        }

        found.sort_by(|a, b| a.dir.cmp(&b.dir));
        Ok(found)
    }

    /// Rebuild an entity's manifest from its directory contents.
    ///
    /// Used when the index file is missing or distrusted. Identity comes
    /// from the existing manifest when present, else from `fallback`.
    /// Files are grouped by resource directory (nested) or name prefix
    /// (flat); anything else, including child entity directories, is left
    /// alone.
    pub fn rescan_entity(
        &self,
        entity_dir: &Path,
        fallback: Option<EntityRecord>,
    ) -> Result<EntityManifest> {
        let lock = self.entity_lock(entity_dir)?;
        let _guard = lock.lock().map_err(|_| poisoned("entity lock"))?;

        let record = match EntityManifest::load(entity_dir)? {
            Some(existing) => existing.entity,
            None => fallback.ok_or_else(|| CaravelError::Store {
                message: format!(
                    "{} has no manifest and no identity was supplied",
                    entity_dir.display()
                ),
            })?,
        };

        let mut manifest = EntityManifest::new(record);
        let mut grouped: HashMap<ResourceType, Vec<ManifestFile>> = HashMap::new();

        for entry in WalkDir::new(entity_dir).min_depth(1) {
            let entry = entry.map_err(|e| CaravelError::Store {
                message: format!("Walk failed under {}: {}", entity_dir.display(), e),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(entity_dir)
                .map_err(|_| CaravelError::Store {
                    message: format!("Path escape under {}", entity_dir.display()),
                })?;
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            if rel_str.ends_with(StoreConfig::TEMP_SUFFIX)
                || rel_str == StoreConfig::MANIFEST_FILENAME
            {
                continue;
            }
            // Child entities keep their own manifests and their own files
            if rel_str.contains('/') && self.layout == LayoutMode::Nested {
                let first = rel_str.split('/').next().unwrap_or("");
                let Some(resource) = ResourceType::from_name(first) else {
                    continue;
                };
                let (size, blake3) = hash_file(entry.path())?;
                grouped.entry(resource).or_default().push(ManifestFile {
                    path: rel_str,
                    size,
                    blake3,
                    sha256: None,
                });
            } else if self.layout == LayoutMode::Flat && !rel_str.contains('/') {
                let Some(resource) = ResourceType::ALL
                    .iter()
                    .copied()
                    .find(|t| rel_str.starts_with(&format!("{}-", t.dir_name())))
                else {
                    continue;
                };
                let (size, blake3) = hash_file(entry.path())?;
                grouped.entry(resource).or_default().push(ManifestFile {
                    path: rel_str,
                    size,
                    blake3,
                    sha256: None,
                });
            }
        }

        for (resource, mut files) in grouped {
            files.sort_by(|a, b| a.path.cmp(&b.path));
            manifest.record_resource(resource, files);
        }
        manifest.save(entity_dir)?;
        Ok(manifest)
    }

    // ========================================
    // Locking
    // ========================================

    fn entity_lock(&self, entity_dir: &Path) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .entity_locks
            .lock()
            .map_err(|_| poisoned("entity lock map"))?;
        Ok(locks
            .entry(entity_dir.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }
}

fn poisoned(what: &str) -> CaravelError {
    CaravelError::Store {
        message: format!("{} poisoned by a panicked writer", what),
    }
}

fn suffixed(base: &str, id: &str) -> String {
    format!("{}-{}", base, sanitize_component(id))
}

/// Names an entity directory must not take in a nested layout.
fn is_reserved_name(name: &str) -> bool {
    name == StoreConfig::MANIFEST_FILENAME
        || name == StoreConfig::STATE_DIR_NAME
        || ResourceType::from_name(name).is_some()
}

/// Make one vendor-supplied name safe as a single path component.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '-',
            _ => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

fn sanitize_rel_path(raw: &str) -> String {
    let parts: Vec<String> = raw
        .split('/')
        .filter(|p| !p.is_empty())
        .map(sanitize_component)
        .collect();
    if parts.is_empty() {
        "_".to_string()
    } else {
        parts.join("/")
    }
}
