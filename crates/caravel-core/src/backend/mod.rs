//! Backend adapters: vendor-facing implementations of the migration
//! interface.
//!
//! Each data source implements [`Backend`] once; the enumerator and the
//! pull/push pipelines only ever see this trait and the vendor-agnostic
//! [`RemoteEntity`] shape. Adding a vendor means adding an adapter, not
//! touching the pipelines.

mod gridrun;
mod native;
mod sync;

pub use gridrun::{GridRunBackend, GridRunConfig};
pub use native::{NativeBackend, NativeConfig};
pub use sync::{SyncLedger, SyncWatermark};

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{CaravelError, Result};
use crate::locator::{EntityKind, Locator};
use crate::resources::ResourceType;

/// Convenience alias for a shared backend instance.
pub type DynBackend = Arc<dyn Backend>;

/// Vendor-agnostic description of one remote entity.
///
/// Only adapters translate vendor identifiers into this shape; everything
/// downstream treats `id` as opaque.
#[derive(Debug, Clone)]
pub struct RemoteEntity {
    pub kind: EntityKind,
    /// Stable vendor identifier.
    pub id: String,
    /// Display name, when the vendor distinguishes one from the id.
    pub name: Option<String>,
    /// Locator of the parent this entity was enumerated under.
    pub parent: Locator,
    pub last_modified: Option<DateTime<Utc>>,
    /// Number of children, when the vendor reports it (feeds estimates).
    pub child_count: Option<u64>,
}

impl RemoteEntity {
    /// Best name for paths and logs: the display name, else the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Derive the child locator this entity occupies under its parent.
    pub fn locator(&self) -> Locator {
        let workspace = self.parent.workspace_name().to_string();
        match (&self.parent, self.kind) {
            (Locator::Workspace { .. }, EntityKind::Project) => Locator::Project {
                workspace,
                project: self.display_name().to_string(),
            },
            (Locator::Project { project, .. }, EntityKind::Experiment) => Locator::Experiment {
                workspace,
                project: project.clone(),
                experiment: self.id.clone(),
            },
            (Locator::Artifact { .. }, EntityKind::Artifact) => Locator::Artifact {
                workspace,
                name: Some(self.display_name().to_string()),
            },
            (Locator::Artifact { name: Some(name), .. }, EntityKind::ArtifactVersion) => {
                Locator::ArtifactVersion {
                    workspace,
                    name: name.clone(),
                    version: self.display_name().to_string(),
                }
            }
            (Locator::ModelRegistryEntry { .. }, EntityKind::ModelRegistryEntry) => {
                Locator::ModelRegistryEntry {
                    workspace,
                    name: Some(self.display_name().to_string()),
                }
            }
            (Locator::ModelRegistryEntry { name: Some(name), .. }, EntityKind::ModelVersion) => {
                Locator::ModelVersion {
                    workspace,
                    name: name.clone(),
                    version: self.display_name().to_string(),
                }
            }
            // Workspaces and already-fully-resolved parents map to themselves
            _ => self.parent.clone(),
        }
    }
}

/// One file of a fetched or pushed resource.
#[derive(Debug, Clone)]
pub struct ResourceFile {
    /// Path relative to the resource's directory in the store, e.g.
    /// `metrics.jsonl` or `images/loss_curve.png`.
    pub rel_path: String,
    pub bytes: Bytes,
    /// SHA-256 the vendor declared for this file, if any; verified on pull.
    pub declared_sha256: Option<String>,
}

impl ResourceFile {
    pub fn new(rel_path: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            rel_path: rel_path.into(),
            bytes: bytes.into(),
            declared_sha256: None,
        }
    }

    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.declared_sha256 = Some(digest.into());
        self
    }
}

/// The byte payload + metadata for one (entity, resource type) pair.
#[derive(Debug, Clone, Default)]
pub struct ResourcePayload {
    pub files: Vec<ResourceFile>,
}

impl ResourcePayload {
    pub fn single(rel_path: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            files: vec![ResourceFile::new(rel_path, bytes)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes.len() as u64).sum()
    }
}

/// Matching policy applied before transfer for the dynamic resource types.
///
/// `asset_type` and `filename` narrow which assets/others are fetched;
/// `metric_excludes` drops matching metric names (the `metrics:<regex>`
/// ignore form). All patterns are regular expressions matched with
/// `Regex::is_match`.
#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    asset_type: Option<Regex>,
    filename: Option<Regex>,
    metric_excludes: Vec<Regex>,
}

impl TransferFilter {
    pub fn new(asset_type: Option<&str>, filename: Option<&str>) -> Result<Self> {
        Ok(Self {
            asset_type: compile(asset_type)?,
            filename: compile(filename)?,
            metric_excludes: Vec::new(),
        })
    }

    pub fn with_metric_excludes<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref();
            compiled.push(Regex::new(pattern).map_err(|e| CaravelError::Config {
                message: format!("Invalid pattern {:?}: {}", pattern, e),
            })?);
        }
        self.metric_excludes = compiled;
        Ok(self)
    }

    /// Whether an asset with this type and filename should transfer.
    pub fn matches_asset(&self, asset_type: &str, filename: &str) -> bool {
        if let Some(re) = &self.asset_type {
            if !re.is_match(asset_type) {
                return false;
            }
        }
        self.matches_filename(filename)
    }

    /// Whether a file with this name should transfer.
    pub fn matches_filename(&self, filename: &str) -> bool {
        match &self.filename {
            Some(re) => re.is_match(filename),
            None => true,
        }
    }

    /// Whether a metric with this name should transfer.
    pub fn metric_allowed(&self, metric_name: &str) -> bool {
        !self.metric_excludes.iter().any(|re| re.is_match(metric_name))
    }

    pub fn is_unrestricted(&self) -> bool {
        self.asset_type.is_none() && self.filename.is_none() && self.metric_excludes.is_empty()
    }

    /// Raw asset-type pattern, for adapters that can narrow server-side.
    pub fn asset_type_pattern(&self) -> Option<&str> {
        self.asset_type.as_ref().map(|re| re.as_str())
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<Regex>> {
    match pattern {
        None => Ok(None),
        Some(p) => Regex::new(p).map(Some).map_err(|e| CaravelError::Config {
            message: format!("Invalid pattern {:?}: {}", p, e),
        }),
    }
}

/// Description/visibility seed for auto-created destination projects.
#[derive(Debug, Clone, Default)]
pub struct ProjectSeed {
    pub description: Option<String>,
    pub public: bool,
}

/// What the push pipeline knows about a source entity when creating its
/// destination counterpart.
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    /// Canonical source path, recorded on the destination for provenance.
    pub source_path: String,
    /// Stable source id.
    pub id: String,
    pub name: Option<String>,
    /// Resource types recorded for this entity.
    pub resources: Vec<ResourceType>,
}

/// Capability interface implemented once per data source.
///
/// Enumeration and fetch drive the pull pipeline; the push operations are
/// additive only (a destination entity is never reused or overwritten).
/// Transient failures (network, timeout, rate limit) are signaled
/// distinctly from permanent ones so the pipelines can retry the former.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short vendor name for logs and reports.
    fn name(&self) -> &'static str;

    /// Identity of the concrete deployment (base URL). Symlink copies are
    /// only valid between locators resolving to equal instance ids.
    fn instance_id(&self) -> &str;

    /// All workspaces visible to the configured credentials.
    async fn list_workspaces(&self) -> Result<Vec<RemoteEntity>>;

    /// Children one level below `parent`, with vendor pagination handled
    /// internally. Restartable: callers may re-enumerate after a partial
    /// failure.
    async fn enumerate_children(&self, parent: &Locator) -> Result<Vec<RemoteEntity>>;

    /// Fetch one resource of one entity. `Ok(None)` means the entity has
    /// no data of this type, which is common and not an error.
    async fn fetch_resource(
        &self,
        entity: &Locator,
        resource: ResourceType,
        filter: &TransferFilter,
    ) -> Result<Option<ResourcePayload>>;

    /// Create the project if it does not exist yet.
    async fn create_project(
        &self,
        workspace: &str,
        project: &str,
        seed: &ProjectSeed,
    ) -> Result<()>;

    /// Create a new destination entity under `dest`. Always creates; an
    /// existing entity with the same display name is left untouched and a
    /// distinctly-identified sibling appears instead.
    async fn push_entity(&self, dest: &Locator, source: &EntitySnapshot) -> Result<RemoteEntity>;

    /// Upload one resource to an entity created by [`Backend::push_entity`].
    async fn push_resource(
        &self,
        dest: &RemoteEntity,
        resource: ResourceType,
        payload: &ResourcePayload,
    ) -> Result<()>;

    /// Create a lightweight reference in `dest` pointing at the existing
    /// `source_experiment`, transferring no resource bytes.
    async fn link_entity(
        &self,
        source_experiment: &Locator,
        dest: &Locator,
    ) -> Result<RemoteEntity>;

    /// Whether this adapter can answer [`Backend::resources_changed_since`].
    fn supports_incremental_sync(&self) -> bool {
        false
    }

    /// Resource types of `entity` changed since the watermark. Only called
    /// when [`Backend::supports_incremental_sync`] returns true.
    async fn resources_changed_since(
        &self,
        entity: &Locator,
        _watermark: &SyncWatermark,
    ) -> Result<BTreeSet<ResourceType>> {
        Err(CaravelError::Unsupported {
            backend: self.name().to_string(),
            operation: format!("incremental sync for {}", entity),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_entity_locator_derivation() {
        let project = RemoteEntity {
            kind: EntityKind::Project,
            id: "p-123".into(),
            name: Some("vision".into()),
            parent: Locator::workspace("team"),
            last_modified: None,
            child_count: Some(3),
        };
        assert_eq!(project.locator(), Locator::project("team", "vision"));

        let experiment = RemoteEntity {
            kind: EntityKind::Experiment,
            id: "abc123".into(),
            name: Some("warm-start".into()),
            parent: project.locator(),
            last_modified: None,
            child_count: None,
        };
        assert_eq!(
            experiment.locator(),
            Locator::experiment("team", "vision", "abc123")
        );
    }

    #[test]
    fn test_remote_entity_artifact_version_locator() {
        let version = RemoteEntity {
            kind: EntityKind::ArtifactVersion,
            id: "av-1".into(),
            name: Some("2.0.0".into()),
            parent: Locator::Artifact {
                workspace: "team".into(),
                name: Some("dataset".into()),
            },
            last_modified: None,
            child_count: None,
        };
        assert_eq!(
            version.locator(),
            Locator::ArtifactVersion {
                workspace: "team".into(),
                name: "dataset".into(),
                version: "2.0.0".into(),
            }
        );
    }

    #[test]
    fn test_transfer_filter_asset_matching() {
        let filter = TransferFilter::new(Some("^image$"), Some(r"\.png$")).unwrap();
        assert!(filter.matches_asset("image", "plot.png"));
        assert!(!filter.matches_asset("image", "plot.jpg"));
        assert!(!filter.matches_asset("audio", "plot.png"));

        let open = TransferFilter::default();
        assert!(open.matches_asset("anything", "any.file"));
        assert!(open.is_unrestricted());
    }

    #[test]
    fn test_transfer_filter_metric_excludes() {
        let filter = TransferFilter::default()
            .with_metric_excludes(&["^sys\\..*", "debug"])
            .unwrap();
        assert!(!filter.metric_allowed("sys.cpu.util"));
        assert!(!filter.metric_allowed("loss_debug"));
        assert!(filter.metric_allowed("val_accuracy"));
    }

    #[test]
    fn test_transfer_filter_rejects_bad_pattern() {
        assert!(TransferFilter::new(Some("("), None).is_err());
    }

    #[test]
    fn test_payload_accounting() {
        let payload = ResourcePayload {
            files: vec![
                ResourceFile::new("a.txt", Bytes::from_static(b"12345")),
                ResourceFile::new("b/c.txt", Bytes::from_static(b"123")),
            ],
        };
        assert_eq!(payload.total_bytes(), 8);
        assert!(!payload.is_empty());
        assert!(ResourcePayload::default().is_empty());
    }
}
