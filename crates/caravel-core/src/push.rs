//! The push pipeline: local store (or source backend) to destination
//! backend.
//!
//! Copies follow a fixed shape matrix: workspace to workspace, project
//! to project, experiment to project. Destination entities are always
//! created fresh, so pushing the same source twice yields two distinct
//! copies and nothing on the destination is ever overwritten.
//!
//! Materializing copies read payloads from the local store. Symlink
//! copies enumerate the source backend directly and create references
//! on the destination without moving a single resource byte; they are
//! only valid when both locators resolve to the same deployment.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{
    DynBackend, EntitySnapshot, ProjectSeed, RemoteEntity, ResourcePayload,
};
use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::{CaravelError, Result};
use crate::locator::{EntityKind, Locator};
use crate::network::{retry_async, RetryConfig};
use crate::report::{MigrationReport, ReportEntry};
use crate::resources::{ResourceScope, ResourceSelection, ResourceType};
use crate::store::{LocalStore, StoredEntity};
use crate::walk::EntityWalker;

#[derive(Debug, Clone)]
pub struct PushOptions {
    pub selection: ResourceSelection,
    /// Reference copy instead of a materializing one.
    pub symlink: bool,
    pub workers: usize,
    pub retry: RetryConfig,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            selection: ResourceSelection::all(),
            symlink: false,
            workers: EngineConfig::DEFAULT_WORKERS,
            retry: RetryConfig::default(),
        }
    }
}

/// What to copy and where to put it.
#[derive(Debug, Clone)]
pub struct PushRequest {
    /// Experiment-domain locator naming previously pulled data (or, for
    /// symlink copies, data on the source backend).
    pub source: Locator,
    /// Workspace or project on the destination.
    pub dest: Locator,
}

/// One stored entity on its way to a destination project.
struct PushUnit {
    stored: StoredEntity,
    dest_project: Locator,
}

struct PushContext {
    dest: DynBackend,
    store: Arc<LocalStore>,
    cancel: CancellationToken,
    options: PushOptions,
    entries: Mutex<Vec<ReportEntry>>,
}

impl PushContext {
    fn record(&self, entry: ReportEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    fn drain(&self) -> Vec<ReportEntry> {
        match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries),
            Err(_) => Vec::new(),
        }
    }
}

pub struct PushPipeline {
    source: DynBackend,
    dest: DynBackend,
    store: Arc<LocalStore>,
    cancel: CancellationToken,
    options: PushOptions,
}

impl PushPipeline {
    pub fn new(
        source: DynBackend,
        dest: DynBackend,
        store: Arc<LocalStore>,
        cancel: CancellationToken,
        options: PushOptions,
    ) -> PushPipeline {
        PushPipeline {
            source,
            dest,
            store,
            cancel,
            options,
        }
    }

    pub async fn run(&self, request: &PushRequest) -> Result<MigrationReport> {
        validate_push_matrix(&request.source, &request.dest)?;
        if self.options.symlink {
            self.require_same_deployment(request)?;
        }
        self.require_dest_workspace(request).await?;

        let mut report = MigrationReport::begin();
        info!(
            "Push {} -> {} on {} started ({}{})",
            request.source,
            request.dest,
            self.dest.name(),
            report.id,
            if self.options.symlink { ", symlink" } else { "" }
        );

        let ctx = Arc::new(PushContext {
            dest: Arc::clone(&self.dest),
            store: Arc::clone(&self.store),
            cancel: self.cancel.clone(),
            options: self.options.clone(),
            entries: Mutex::new(Vec::new()),
        });

        if self.options.symlink {
            self.run_symlink(&ctx, request).await?;
        } else {
            self.run_materialize(&ctx, request).await?;
        }

        report.extend(ctx.drain());
        let report = report.finish();
        let summary = report.summary();
        info!(
            "Push {} finished: {} succeeded, {} skipped, {} failed",
            report.id, summary.totals.succeeded, summary.totals.skipped, summary.totals.failed
        );
        Ok(report)
    }

    /// Symlink copies stay inside one deployment; cross-instance
    /// requests are refused before any network call.
    fn require_same_deployment(&self, request: &PushRequest) -> Result<()> {
        if self.source.instance_id() == self.dest.instance_id() {
            return Ok(());
        }
        Err(CaravelError::InvalidCombination {
            src: request.source.path(),
            dest: request.dest.path(),
            reason: format!(
                "symlink copies need one deployment on both sides, got {} and {}",
                self.source.instance_id(),
                self.dest.instance_id()
            ),
        })
    }

    async fn require_dest_workspace(&self, request: &PushRequest) -> Result<()> {
        let wanted = request.dest.workspace_name();
        let workspaces = self.dest.list_workspaces().await?;
        if workspaces
            .iter()
            .any(|w| w.display_name() == wanted || w.id == wanted)
        {
            Ok(())
        } else {
            Err(CaravelError::NotFound {
                what: format!("workspace {} on {}", wanted, self.dest.name()),
            })
        }
    }

    async fn run_materialize(&self, ctx: &Arc<PushContext>, request: &PushRequest) -> Result<()> {
        let all = self.store.list_entities()?;
        let mut units = Vec::new();
        let mut needed: BTreeSet<String> = BTreeSet::new();
        let dest_ws = request.dest.workspace_name().to_string();

        for stored in all.iter().filter(|s| s.matches(&request.source)) {
            let entity = &stored.manifest.entity;
            let dest_name = match (&request.dest, entity.kind) {
                (Locator::Project { project, .. }, _) => project.clone(),
                (_, EntityKind::Project) => entity
                    .name
                    .clone()
                    .unwrap_or_else(|| entity.id.clone()),
                (_, EntityKind::Experiment) => {
                    entity.project.clone().unwrap_or_else(|| "_".to_string())
                }
                _ => {
                    debug!("{} is not pushable, leaving it in the store", entity.source_path);
                    continue;
                }
            };
            needed.insert(dest_name.clone());
            units.push(PushUnit {
                stored: stored.clone(),
                dest_project: Locator::project(dest_ws.clone(), dest_name),
            });
        }

        if units.is_empty() {
            return Err(CaravelError::NotFound {
                what: format!("{} in the local store", request.source),
            });
        }

        // Projects first, so experiment creation never races its parent
        let mut unavailable: BTreeSet<String> = BTreeSet::new();
        for dest_name in &needed {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let source_project = match &request.source {
                Locator::Workspace { .. } => dest_name.clone(),
                Locator::Project { project, .. } | Locator::Experiment { project, .. } => {
                    project.clone()
                }
                _ => dest_name.clone(),
            };
            let seed = find_project_seed(
                &self.store,
                &all,
                request.source.workspace_name(),
                &source_project,
            );
            let (created, _) = retry_async(&self.options.retry, || {
                self.dest.create_project(&dest_ws, dest_name, &seed)
            })
            .await;
            if let Err(e) = created {
                warn!("Could not create project {}/{}: {}", dest_ws, dest_name, e);
                ctx.record(ReportEntry::failed(
                    format!("{}/{}", dest_ws, dest_name),
                    None,
                    &e,
                ));
                unavailable.insert(dest_name.clone());
            }
        }
        if !unavailable.is_empty() {
            let before = units.len();
            units.retain(|u| match &u.dest_project {
                Locator::Project { project, .. } => !unavailable.contains(project),
                _ => true,
            });
            warn!(
                "{} entities not pushed, their destination projects are unavailable",
                before - units.len()
            );
        }

        let queue = Arc::new(Mutex::new(units.into_iter().collect::<VecDeque<_>>()));
        let workers = self.options.workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let ctx = Arc::clone(ctx);
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(push_worker_loop(ctx, queue)));
        }
        for handle in handles {
            handle
                .await
                .map_err(|e| CaravelError::Other(format!("Push worker panicked: {e}")))?;
        }
        Ok(())
    }

    /// Link copies run on one worker: a project must exist before its
    /// experiments link into it, and the calls are cheap metadata
    /// writes.
    async fn run_symlink(&self, ctx: &Arc<PushContext>, request: &PushRequest) -> Result<()> {
        let dest_ws = request.dest.workspace_name().to_string();
        let mut current_dest: Option<Locator> = None;
        if let Locator::Experiment { .. } = &request.source {
            // Direct experiment: the walker yields no project item, so
            // the destination project is ensured up front
            let dest = request.dest.clone();
            if self.ensure_symlink_project(ctx, &dest).await {
                current_dest = Some(dest);
            } else {
                return Ok(());
            }
        }

        let mut walker = EntityWalker::new(Arc::clone(&self.source), &request.source);
        loop {
            if ctx.cancel.is_cancelled() {
                return Ok(());
            }
            let item = match walker.next().await {
                Ok(Some(item)) => item,
                Ok(None) => return Ok(()),
                Err(e) => {
                    let parent = walker.take_failed().map(|l| l.path()).unwrap_or_default();
                    ctx.record(ReportEntry::failed(parent, None, &e));
                    continue;
                }
            };
            match item.entity.kind {
                EntityKind::Project => {
                    let dest = match &request.dest {
                        Locator::Project { .. } => request.dest.clone(),
                        _ => Locator::project(dest_ws.clone(), item.entity.display_name()),
                    };
                    current_dest = if self.ensure_symlink_project(ctx, &dest).await {
                        Some(dest)
                    } else {
                        None
                    };
                }
                EntityKind::Experiment => {
                    let Some(dest) = current_dest.clone() else {
                        debug!("No destination project for {}, link skipped", item.locator);
                        continue;
                    };
                    let (linked, _) = retry_async(&self.options.retry, || {
                        self.dest.link_entity(&item.locator, &dest)
                    })
                    .await;
                    match linked {
                        Ok(_) => ctx.record(ReportEntry::succeeded(item.locator.path(), None)),
                        Err(e) => {
                            warn!("Linking {} into {} failed: {}", item.locator, dest, e);
                            ctx.record(ReportEntry::failed(item.locator.path(), None, &e));
                        }
                    }
                }
                other => {
                    debug!("{:?} entities cannot be symlinked, skipping", other);
                }
            }
        }
    }

    /// Create a destination project for link copies. Failures are
    /// recorded; the return value says whether links may proceed.
    async fn ensure_symlink_project(&self, ctx: &PushContext, dest: &Locator) -> bool {
        let Locator::Project { workspace, project } = dest else {
            return false;
        };
        let seed = ProjectSeed::default();
        let (created, _) = retry_async(&self.options.retry, || {
            self.dest.create_project(workspace, project, &seed)
        })
        .await;
        match created {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not create project {}: {}", dest, e);
                ctx.record(ReportEntry::failed(dest.path(), None, &e));
                false
            }
        }
    }
}

async fn push_worker_loop(ctx: Arc<PushContext>, queue: Arc<Mutex<VecDeque<PushUnit>>>) {
    loop {
        if ctx.cancel.is_cancelled() {
            return;
        }
        let unit = {
            let Ok(mut queue) = queue.lock() else { return };
            queue.pop_front()
        };
        let Some(unit) = unit else { return };
        push_unit(&ctx, unit).await;
    }
}

async fn push_unit(ctx: &PushContext, unit: PushUnit) {
    let entity = &unit.stored.manifest.entity;
    let path = entity.source_path.clone();
    debug!("Pushing {} -> {}", path, unit.dest_project);

    let recorded = unit.stored.manifest.recorded_resources();
    match entity.kind {
        EntityKind::Project => {
            let dest_entity = project_remote(&unit.dest_project);
            let wanted = wanted_resources(&ctx.options.selection, ResourceScope::Project, &recorded);
            push_resources(ctx, &unit, &dest_entity, &path, wanted).await;
        }
        EntityKind::Experiment => {
            let wanted =
                wanted_resources(&ctx.options.selection, ResourceScope::Experiment, &recorded);
            let snapshot = EntitySnapshot {
                source_path: path.clone(),
                id: entity.id.clone(),
                name: entity.name.clone(),
                resources: wanted.clone(),
            };
            let (created, _) = retry_async(&ctx.options.retry, || {
                ctx.dest.push_entity(&unit.dest_project, &snapshot)
            })
            .await;
            let dest_entity = match created {
                Ok(dest_entity) => dest_entity,
                Err(e) => {
                    warn!("Creating a copy of {} failed: {}", path, e);
                    ctx.record(ReportEntry::failed(&path, None, &e));
                    return;
                }
            };
            push_resources(ctx, &unit, &dest_entity, &path, wanted).await;
        }
        _ => {}
    }
}

async fn push_resources(
    ctx: &PushContext,
    unit: &PushUnit,
    dest_entity: &RemoteEntity,
    path: &str,
    resources: Vec<ResourceType>,
) {
    for resource in resources {
        if ctx.cancel.is_cancelled() {
            return;
        }
        let payload = match ctx.store.read_resource(&unit.stored.dir, resource) {
            Ok(payload) => payload,
            Err(e) => {
                // Local read trouble: stop touching this entity
                warn!("Reading {} {} back failed: {}", path, resource, e);
                ctx.record(ReportEntry::failed(path, Some(resource), &e));
                return;
            }
        };
        let (pushed, stats) = retry_async(&ctx.options.retry, || {
            ctx.dest.push_resource(dest_entity, resource, &payload)
        })
        .await;
        if stats.attempts > 1 {
            debug!("{} {} took {} attempts", path, resource, stats.attempts);
        }
        match pushed {
            Ok(()) => ctx.record(ReportEntry::succeeded(path, Some(resource))),
            Err(e) => {
                warn!("Pushing {} {} failed: {}", path, resource, e);
                ctx.record(ReportEntry::failed(path, Some(resource), &e));
            }
        }
    }
}

/// Fixed copy matrix. Anything outside it is refused before the first
/// network call.
fn validate_push_matrix(source: &Locator, dest: &Locator) -> Result<()> {
    let allowed = matches!(
        (source, dest),
        (Locator::Workspace { .. }, Locator::Workspace { .. })
            | (Locator::Project { .. }, Locator::Project { .. })
            | (Locator::Experiment { .. }, Locator::Project { .. })
    );
    if allowed {
        Ok(())
    } else {
        Err(CaravelError::InvalidCombination {
            src: source.path(),
            dest: dest.path(),
            reason: "allowed copies are workspace to workspace, project to project, \
                     and experiment to project"
                .to_string(),
        })
    }
}

fn wanted_resources(
    selection: &ResourceSelection,
    scope: ResourceScope,
    recorded: &[ResourceType],
) -> Vec<ResourceType> {
    selection
        .with_scope(scope)
        .into_iter()
        .filter(|r| recorded.contains(r))
        .collect()
}

fn project_remote(dest_project: &Locator) -> RemoteEntity {
    let workspace = dest_project.workspace_name().to_string();
    let name = match dest_project {
        Locator::Project { project, .. } => project.clone(),
        other => other.path(),
    };
    RemoteEntity {
        kind: EntityKind::Project,
        id: name.clone(),
        name: Some(name),
        parent: Locator::workspace(workspace),
        last_modified: None,
        child_count: None,
    }
}

/// Seed for an auto-created destination project, from the source
/// project's stored metadata when the store has it.
fn find_project_seed(
    store: &LocalStore,
    all: &[StoredEntity],
    workspace: &str,
    project: &str,
) -> ProjectSeed {
    let found = all.iter().find(|s| {
        let e = &s.manifest.entity;
        e.kind == EntityKind::Project
            && e.workspace == workspace
            && (e.name.as_deref() == Some(project) || e.id == project)
    });
    let Some(stored) = found else {
        return ProjectSeed::default();
    };
    match store.read_resource(&stored.dir, ResourceType::ProjectMetadata) {
        Ok(payload) => seed_from_metadata(&payload),
        Err(_) => ProjectSeed::default(),
    }
}

/// Tolerant parse: vendors disagree on field names, and a seed is only
/// a nicety.
fn seed_from_metadata(payload: &ResourcePayload) -> ProjectSeed {
    let Some(file) = payload.files.first() else {
        return ProjectSeed::default();
    };
    let Ok(doc) = serde_json::from_slice::<Value>(&file.bytes) else {
        return ProjectSeed::default();
    };
    ProjectSeed {
        description: doc
            .get("projectDescription")
            .or_else(|| doc.get("description"))
            .and_then(Value::as_str)
            .map(str::to_string),
        public: doc
            .get("isPublic")
            .or_else(|| doc.get("public"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_matrix() {
        let ws = Locator::workspace("a");
        let proj = Locator::project("a", "p");
        let exp = Locator::experiment("a", "p", "e");

        assert!(validate_push_matrix(&ws, &ws).is_ok());
        assert!(validate_push_matrix(&proj, &proj).is_ok());
        assert!(validate_push_matrix(&exp, &proj).is_ok());

        assert!(validate_push_matrix(&ws, &proj).is_err());
        assert!(validate_push_matrix(&proj, &ws).is_err());
        assert!(validate_push_matrix(&exp, &ws).is_err());
        assert!(validate_push_matrix(&proj, &exp).is_err());

        let artifact = Locator::Artifact {
            workspace: "a".to_string(),
            name: Some("weights".to_string()),
        };
        assert!(validate_push_matrix(&artifact, &proj).is_err());
    }

    #[test]
    fn test_seed_from_metadata_accepts_both_vendors() {
        let native = ResourcePayload::single(
            "project_metadata.json",
            br#"{"projectDescription": "vision models", "isPublic": true}"#.to_vec(),
        );
        let seed = seed_from_metadata(&native);
        assert_eq!(seed.description.as_deref(), Some("vision models"));
        assert!(seed.public);

        let other = ResourcePayload::single(
            "project_metadata.json",
            br#"{"description": "scratch", "public": false}"#.to_vec(),
        );
        let seed = seed_from_metadata(&other);
        assert_eq!(seed.description.as_deref(), Some("scratch"));
        assert!(!seed.public);

        assert!(seed_from_metadata(&ResourcePayload::default())
            .description
            .is_none());
    }

    #[test]
    fn test_wanted_resources_intersects_recorded() {
        let selection = ResourceSelection::all();
        let recorded = vec![ResourceType::Metrics, ResourceType::ProjectNotes];
        let wanted = wanted_resources(&selection, ResourceScope::Experiment, &recorded);
        assert_eq!(wanted, vec![ResourceType::Metrics]);
        let wanted = wanted_resources(&selection, ResourceScope::Project, &recorded);
        assert_eq!(wanted, vec![ResourceType::ProjectNotes]);
    }

    #[test]
    fn test_project_remote_shape() {
        let remote = project_remote(&Locator::project("team", "vision"));
        assert_eq!(remote.kind, EntityKind::Project);
        assert_eq!(remote.display_name(), "vision");
        assert_eq!(remote.parent, Locator::workspace("team"));
    }
}
