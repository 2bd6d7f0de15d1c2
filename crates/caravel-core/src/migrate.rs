//! The migration coordinator.
//!
//! [`Migrator`] wires one source backend, an optional destination
//! backend, the local store and a cancellation token together, and
//! exposes the engine operations: estimate, pull, push, migrate, sync
//! and list.

use std::sync::Arc;

use tracing::info;

use crate::backend::{DynBackend, SyncLedger};
use crate::cancel::CancellationToken;
use crate::error::{CaravelError, Result};
use crate::locator::Locator;
use crate::pull::{PullOptions, PullPipeline};
use crate::push::{PushOptions, PushPipeline, PushRequest};
use crate::report::MigrationReport;
use crate::store::LocalStore;
use crate::walk::{self, MigrationEstimate};

/// What a sync run covers. `All` walks every workspace the credentials
/// can see; the other scopes take the matching locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    All,
    Workspace,
    Project,
    Experiment,
}

pub struct Migrator {
    source: DynBackend,
    dest: Option<DynBackend>,
    store: Arc<LocalStore>,
    ledger: Arc<SyncLedger>,
    cancel: CancellationToken,
}

// Manual impl: `dyn Backend` carries no `Debug` bound, so the struct
// cannot derive it.
impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("source", &self.source.name())
            .field("dest", &self.dest.as_ref().map(|d| d.name()))
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct MigratorBuilder {
    source: Option<DynBackend>,
    dest: Option<DynBackend>,
    store: Option<LocalStore>,
    cancel: Option<CancellationToken>,
}

impl MigratorBuilder {
    pub fn source(mut self, backend: DynBackend) -> Self {
        self.source = Some(backend);
        self
    }

    pub fn dest(mut self, backend: DynBackend) -> Self {
        self.dest = Some(backend);
        self
    }

    pub fn store(mut self, store: LocalStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<Migrator> {
        let source = self.source.ok_or_else(|| CaravelError::Config {
            message: "A source backend is required".to_string(),
        })?;
        let store = Arc::new(self.store.ok_or_else(|| CaravelError::Config {
            message: "A local store is required".to_string(),
        })?);
        let ledger = Arc::new(SyncLedger::open(&store.state_dir())?);
        Ok(Migrator {
            source,
            dest: self.dest,
            store,
            ledger,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

impl Migrator {
    pub fn builder() -> MigratorBuilder {
        MigratorBuilder::default()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Size up a migration without fetching any resources.
    ///
    /// Unlike the report-producing operations, which end early with a
    /// partial report when cancelled, this has no partial result to
    /// return and refuses a cancelled token outright.
    pub async fn estimate(&self, locator: &Locator) -> Result<MigrationEstimate> {
        self.cancel.check()?;
        walk::estimate(&self.source, locator).await
    }

    /// Download everything `locator` expands to into the local store.
    pub async fn pull(&self, locator: &Locator, options: PullOptions) -> Result<MigrationReport> {
        PullPipeline::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            Arc::clone(&self.ledger),
            self.cancel.clone(),
            options,
        )
        .run(locator)
        .await
    }

    /// Copy previously pulled data (or, for symlink copies, live source
    /// data) to the destination backend.
    pub async fn push(&self, request: &PushRequest, options: PushOptions) -> Result<MigrationReport> {
        let dest = self.dest_backend()?;
        PushPipeline::new(
            Arc::clone(&self.source),
            dest,
            Arc::clone(&self.store),
            self.cancel.clone(),
            options,
        )
        .run(request)
        .await
    }

    /// Pull then push as one logical migration with one merged report.
    /// The local store keeps the intermediate copy.
    pub async fn migrate(
        &self,
        locator: &Locator,
        dest: &Locator,
        pull: PullOptions,
        push: PushOptions,
    ) -> Result<MigrationReport> {
        let pulled = self.pull(locator, pull).await?;
        if self.cancel.is_cancelled() {
            return Ok(pulled);
        }
        let request = PushRequest {
            source: locator.clone(),
            dest: dest.clone(),
        };
        let pushed = self.push(&request, push).await?;
        Ok(pulled.merge(pushed))
    }

    /// Incremental pull: resources unchanged since the last sync are
    /// pruned using the sync ledger where the source supports change
    /// probes.
    pub async fn sync(
        &self,
        scope: SyncScope,
        locator: Option<Locator>,
        options: PullOptions,
    ) -> Result<MigrationReport> {
        let mut options = options;
        options.incremental = true;

        let roots = self.resolve_sync_roots(scope, locator).await?;
        info!("Sync covers {} root(s)", roots.len());

        let mut merged: Option<MigrationReport> = None;
        for root in roots {
            if self.cancel.is_cancelled() {
                break;
            }
            let report = self.pull(&root, options.clone()).await?;
            merged = Some(match merged {
                Some(m) => m.merge(report),
                None => report,
            });
        }
        Ok(merged.unwrap_or_else(|| MigrationReport::begin().finish()))
    }

    /// Canonical paths one level below `locator` on the source.
    pub async fn list(&self, locator: &Locator) -> Result<Vec<String>> {
        self.cancel.check()?;
        let children = self.source.enumerate_children(locator).await?;
        Ok(children.into_iter().map(|c| c.locator().path()).collect())
    }

    async fn resolve_sync_roots(
        &self,
        scope: SyncScope,
        locator: Option<Locator>,
    ) -> Result<Vec<Locator>> {
        match (scope, locator) {
            (SyncScope::All, _) => Ok(self
                .source
                .list_workspaces()
                .await?
                .into_iter()
                .map(|w| Locator::workspace(w.display_name()))
                .collect()),
            (SyncScope::Workspace, Some(root @ Locator::Workspace { .. }))
            | (SyncScope::Project, Some(root @ Locator::Project { .. }))
            | (SyncScope::Experiment, Some(root @ Locator::Experiment { .. })) => Ok(vec![root]),
            (scope, locator) => Err(CaravelError::Config {
                message: match locator {
                    Some(locator) => {
                        format!("Sync scope {:?} does not cover {}", scope, locator)
                    }
                    None => format!("Sync scope {:?} needs a locator", scope),
                },
            }),
        }
    }

    fn dest_backend(&self) -> Result<DynBackend> {
        self.dest.clone().ok_or_else(|| CaravelError::Config {
            message: "No destination backend configured".to_string(),
        })
    }
}
