//! The pull pipeline: source backend to local store.
//!
//! A bounded worker pool drains the walker; each worker owns one entity
//! at a time and processes its resource set sequentially, so distinct
//! entities download in parallel while a single entity's files land in
//! order. Workers check the cancellation token between entities and
//! between resources, never mid-write.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::backend::{DynBackend, SyncLedger, TransferFilter};
use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::{CaravelError, ErrorKind, Result};
use crate::locator::{EntityKind, Locator};
use crate::network::{retry_async, RetryConfig};
use crate::report::{MigrationReport, ReportEntry, SkipReason};
use crate::resources::{ResourceScope, ResourceSelection, ResourceType};
use crate::store::{EntityRecord, LocalStore};
use crate::walk::{EntityWalker, WalkItem};

#[derive(Debug, Clone)]
pub struct PullOptions {
    pub selection: ResourceSelection,
    /// Replace resources the store already holds. Off by default; the
    /// engine never deletes.
    pub overwrite: bool,
    pub filter: TransferFilter,
    pub workers: usize,
    pub retry: RetryConfig,
    /// Prune unchanged resources using the sync ledger where the source
    /// adapter supports change probes.
    pub incremental: bool,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            selection: ResourceSelection::all(),
            overwrite: false,
            filter: TransferFilter::default(),
            workers: EngineConfig::DEFAULT_WORKERS,
            retry: RetryConfig::default(),
            incremental: false,
        }
    }
}

/// Shared state for one pull run.
struct PullContext {
    backend: DynBackend,
    store: Arc<LocalStore>,
    ledger: Arc<SyncLedger>,
    cancel: CancellationToken,
    options: PullOptions,
    /// Caller filter with the selection's metric excludes folded in.
    filter: TransferFilter,
    entries: Mutex<Vec<ReportEntry>>,
}

impl PullContext {
    fn record(&self, entry: ReportEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

/// What a resource step means for the rest of its entity.
enum StepOutcome {
    Done,
    Failed,
    /// Local filesystem trouble: stop touching this entity, move on.
    Abort,
}

pub struct PullPipeline {
    backend: DynBackend,
    store: Arc<LocalStore>,
    ledger: Arc<SyncLedger>,
    cancel: CancellationToken,
    options: PullOptions,
}

impl PullPipeline {
    pub fn new(
        backend: DynBackend,
        store: Arc<LocalStore>,
        ledger: Arc<SyncLedger>,
        cancel: CancellationToken,
        options: PullOptions,
    ) -> PullPipeline {
        PullPipeline {
            backend,
            store,
            ledger,
            cancel,
            options,
        }
    }

    /// Pull everything `root` expands to. Cancellation stops scheduling
    /// and returns the report of what completed; only structural
    /// problems (bad root, worker panic) surface as `Err`.
    pub async fn run(&self, root: &Locator) -> Result<MigrationReport> {
        validate_pull_root(root)?;

        let mut report = MigrationReport::begin();
        info!(
            "Pull {} from {} started ({})",
            root,
            self.backend.name(),
            report.id
        );

        let mut filter = self.options.filter.clone();
        if !self.options.selection.metric_excludes().is_empty() {
            filter = filter.with_metric_excludes(self.options.selection.metric_excludes())?;
        }
        if !filter.is_unrestricted() {
            debug!("Pull {} runs with a restricted transfer filter", report.id);
        }

        let ctx = Arc::new(PullContext {
            backend: Arc::clone(&self.backend),
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            cancel: self.cancel.clone(),
            options: self.options.clone(),
            filter,
            entries: Mutex::new(Vec::new()),
        });
        let walker = Arc::new(tokio::sync::Mutex::new(EntityWalker::new(
            Arc::clone(&self.backend),
            root,
        )));

        let workers = self.options.workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let ctx = Arc::clone(&ctx);
            let walker = Arc::clone(&walker);
            handles.push(tokio::spawn(worker_loop(ctx, walker)));
        }
        for handle in handles {
            handle
                .await
                .map_err(|e| CaravelError::Other(format!("Pull worker panicked: {e}")))?;
        }

        let entries = {
            let mut guard = ctx
                .entries
                .lock()
                .map_err(|_| CaravelError::Other("Pull report poisoned".to_string()))?;
            std::mem::take(&mut *guard)
        };
        report.extend(entries);
        let report = report.finish();

        let summary = report.summary();
        info!(
            "Pull {} finished: {} succeeded, {} skipped, {} failed",
            report.id, summary.totals.succeeded, summary.totals.skipped, summary.totals.failed
        );
        Ok(report)
    }
}

/// Container artifact/model locators enumerate fine but name no
/// pullable payload; they are for `list`.
fn validate_pull_root(root: &Locator) -> Result<()> {
    match root {
        Locator::Artifact { name: None, .. } | Locator::ModelRegistryEntry { name: None, .. } => {
            Err(CaravelError::InvalidCombination {
                src: root.path(),
                dest: "local store".to_string(),
                reason: "artifact and model listings are browse-only, name a collection or version"
                    .to_string(),
            })
        }
        _ => Ok(()),
    }
}

async fn worker_loop(ctx: Arc<PullContext>, walker: Arc<tokio::sync::Mutex<EntityWalker>>) {
    loop {
        if ctx.cancel.is_cancelled() {
            return;
        }
        let item = {
            let mut walker = walker.lock().await;
            match walker.next().await {
                Ok(Some(item)) => item,
                Ok(None) => return,
                Err(e) => {
                    // The frame is gone; siblings keep coming
                    let parent = walker.take_failed().map(|l| l.path()).unwrap_or_default();
                    ctx.record(ReportEntry::failed(parent, None, &e));
                    continue;
                }
            }
        };
        pull_entity(&ctx, &item).await;
    }
}

async fn pull_entity(ctx: &PullContext, item: &WalkItem) {
    let path = item.locator.path();
    debug!("Pulling {}", path);

    let record = entity_record(ctx.backend.instance_id(), item);
    let entity_dir = match ctx.store.prepare_entity(&record) {
        Ok(dir) => dir,
        Err(e) => {
            warn!("Could not prepare a directory for {}: {}", path, e);
            ctx.record(ReportEntry::failed(&path, None, &e));
            return;
        }
    };

    let scope = match item.entity.kind {
        EntityKind::Project => ResourceScope::Project,
        _ => ResourceScope::Experiment,
    };
    let resources = ctx.options.selection.with_scope(scope);
    let changed = changed_since_watermark(ctx, item, &path).await;

    let mut clean = true;
    for resource in resources {
        if ctx.cancel.is_cancelled() {
            return;
        }
        if let Some(changed) = &changed {
            if !changed.contains(&resource) {
                ctx.record(ReportEntry::skipped(
                    &path,
                    Some(resource),
                    SkipReason::UpToDate,
                ));
                continue;
            }
        }
        match pull_resource(ctx, item, &entity_dir, resource, &path).await {
            StepOutcome::Done => {}
            StepOutcome::Failed => clean = false,
            StepOutcome::Abort => {
                clean = false;
                break;
            }
        }
    }

    if clean && !ctx.cancel.is_cancelled() {
        advance_watermark(ctx, item, &path);
    }
}

async fn pull_resource(
    ctx: &PullContext,
    item: &WalkItem,
    entity_dir: &Path,
    resource: ResourceType,
    path: &str,
) -> StepOutcome {
    match ctx.store.has(entity_dir, resource) {
        Ok(Some(_)) if !ctx.options.overwrite => {
            ctx.record(ReportEntry::skipped(
                path,
                Some(resource),
                SkipReason::AlreadyPresent,
            ));
            return StepOutcome::Done;
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Manifest check for {} {} failed: {}", path, resource, e);
            ctx.record(ReportEntry::failed(path, Some(resource), &e));
            return StepOutcome::Abort;
        }
    }

    let (fetched, stats) = retry_async(&ctx.options.retry, || {
        ctx.backend.fetch_resource(&item.locator, resource, &ctx.filter)
    })
    .await;
    if stats.attempts > 1 {
        debug!("{} {} took {} attempts", path, resource, stats.attempts);
    }

    match fetched {
        Ok(None) => {
            ctx.record(ReportEntry::skipped(
                path,
                Some(resource),
                SkipReason::NotApplicable,
            ));
            StepOutcome::Done
        }
        Ok(Some(payload)) if payload.is_empty() => {
            ctx.record(ReportEntry::skipped(
                path,
                Some(resource),
                SkipReason::FilteredOut,
            ));
            StepOutcome::Done
        }
        Ok(Some(payload)) => match ctx.store.write_resource(entity_dir, resource, &payload) {
            Ok(files) => {
                debug!(
                    "Stored {} file(s), {} bytes, for {} {}",
                    files.len(),
                    payload.total_bytes(),
                    path,
                    resource
                );
                ctx.record(ReportEntry::succeeded(path, Some(resource)));
                StepOutcome::Done
            }
            Err(e) => {
                warn!("Writing {} {} failed: {}", path, resource, e);
                ctx.record(ReportEntry::failed(path, Some(resource), &e));
                StepOutcome::Abort
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            // Races with deletion on the source are skips, not failures
            ctx.record(ReportEntry::skipped(
                path,
                Some(resource),
                SkipReason::NotApplicable,
            ));
            StepOutcome::Done
        }
        Err(e) => {
            warn!("Fetching {} {} failed: {}", path, resource, e);
            ctx.record(ReportEntry::failed(path, Some(resource), &e));
            StepOutcome::Failed
        }
    }
}

/// Changed-resource probe for incremental pulls. `None` means pull in
/// full: mode off, no watermark yet, a container entity, or a probe
/// error.
async fn changed_since_watermark(
    ctx: &PullContext,
    item: &WalkItem,
    path: &str,
) -> Option<BTreeSet<ResourceType>> {
    if !ctx.options.incremental
        || item.entity.kind == EntityKind::Project
        || !ctx.backend.supports_incremental_sync()
    {
        return None;
    }
    let watermark = ctx.ledger.watermark(ctx.backend.instance_id(), path)?;
    match ctx
        .backend
        .resources_changed_since(&item.locator, &watermark)
        .await
    {
        Ok(changed) => Some(changed),
        Err(e) => {
            warn!("Change probe for {} failed, pulling in full: {}", path, e);
            None
        }
    }
}

fn advance_watermark(ctx: &PullContext, item: &WalkItem, path: &str) {
    if !ctx.options.incremental
        || item.entity.kind == EntityKind::Project
        || !ctx.backend.supports_incremental_sync()
    {
        return;
    }
    let marker = item
        .entity
        .last_modified
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
    if let Err(e) = ctx.ledger.advance(ctx.backend.instance_id(), path, marker) {
        // Worst case the next sync pulls more than it had to
        warn!("Could not advance the watermark for {}: {}", path, e);
    }
}

fn entity_record(instance: &str, item: &WalkItem) -> EntityRecord {
    let (workspace, project) = match &item.locator {
        Locator::Experiment {
            workspace, project, ..
        } => (workspace.clone(), Some(project.clone())),
        other => (other.workspace_name().to_string(), None),
    };
    EntityRecord {
        kind: item.entity.kind,
        id: item.entity.id.clone(),
        name: item.entity.name.clone(),
        workspace,
        project,
        source_backend: instance.to_string(),
        source_path: item.locator.path(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_roots_are_rejected() {
        let err = validate_pull_root(&Locator::Artifact {
            workspace: "team".to_string(),
            name: None,
        })
        .unwrap_err();
        assert!(matches!(err, CaravelError::InvalidCombination { .. }));

        let err = validate_pull_root(&Locator::ModelRegistryEntry {
            workspace: "team".to_string(),
            name: None,
        })
        .unwrap_err();
        assert!(matches!(err, CaravelError::InvalidCombination { .. }));
    }

    #[test]
    fn test_named_collection_roots_are_accepted() {
        assert!(validate_pull_root(&Locator::Artifact {
            workspace: "team".to_string(),
            name: Some("weights".to_string()),
        })
        .is_ok());
        assert!(validate_pull_root(&Locator::workspace("team")).is_ok());
    }

    #[test]
    fn test_entity_record_carries_source_identity() {
        let item = WalkItem {
            locator: Locator::experiment("team", "vision", "abc123"),
            entity: crate::backend::RemoteEntity {
                kind: EntityKind::Experiment,
                id: "abc123".to_string(),
                name: Some("try-lr-3".to_string()),
                parent: Locator::project("team", "vision"),
                last_modified: None,
                child_count: None,
            },
        };
        let record = entity_record("native@example.com", &item);
        assert_eq!(record.workspace, "team");
        assert_eq!(record.project.as_deref(), Some("vision"));
        assert_eq!(record.source_backend, "native@example.com");
        assert_eq!(record.source_path, "team/vision/abc123");
    }
}
