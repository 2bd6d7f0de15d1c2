//! Lazy enumeration of migration sources.
//!
//! [`EntityWalker`] expands a locator depth-first, one backend call at a
//! time, and never materializes a whole subtree. Project containers come
//! out before their experiments so project-scoped resources transfer once
//! per project; a directly-addressed experiment yields no project item.

use std::collections::VecDeque;

use tracing::warn;

use crate::backend::{DynBackend, RemoteEntity};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::locator::{EntityKind, Locator};

/// One enumerated entity, ready for resource transfer.
#[derive(Debug, Clone)]
pub struct WalkItem {
    pub locator: Locator,
    pub entity: RemoteEntity,
}

/// Pending work, popped LIFO for depth-first order.
#[derive(Debug)]
enum Task {
    Emit(Box<WalkItem>),
    Expand(Locator),
}

/// Depth-first, lazily expanding iterator over one locator's subtree.
///
/// An enumeration failure drops only the failing frame: the error comes
/// back from [`EntityWalker::next`], the parent it belongs to is kept in
/// [`EntityWalker::take_failed`], and the following call continues with
/// the siblings.
pub struct EntityWalker {
    backend: DynBackend,
    stack: Vec<Task>,
    failed: Option<Locator>,
}

impl EntityWalker {
    pub fn new(backend: DynBackend, root: &Locator) -> EntityWalker {
        let mut stack = Vec::new();
        match root {
            Locator::Workspace { .. }
            | Locator::Artifact { .. }
            | Locator::ModelRegistryEntry { .. } => {
                stack.push(Task::Expand(root.clone()));
            }
            Locator::Project { .. } => {
                // The container bears resources of its own, so it is
                // yielded first even when addressed directly
                stack.push(Task::Expand(root.clone()));
                stack.push(Task::Emit(Box::new(synthesize(root))));
            }
            Locator::Experiment { .. }
            | Locator::ArtifactVersion { .. }
            | Locator::ModelVersion { .. } => {
                stack.push(Task::Emit(Box::new(synthesize(root))));
            }
        }
        EntityWalker {
            backend,
            stack,
            failed: None,
        }
    }

    /// The next entity in depth-first order, or `None` when exhausted.
    pub async fn next(&mut self) -> Result<Option<WalkItem>> {
        while let Some(task) = self.stack.pop() {
            match task {
                Task::Emit(item) => return Ok(Some(*item)),
                Task::Expand(parent) => {
                    let children = match self.backend.enumerate_children(&parent).await {
                        Ok(children) => children,
                        Err(e) => {
                            warn!("Enumeration under {} failed: {}", parent, e);
                            self.failed = Some(parent);
                            return Err(e);
                        }
                    };
                    self.push_children(children);
                }
            }
        }
        Ok(None)
    }

    /// Locator whose expansion produced the last error from `next`.
    pub fn take_failed(&mut self) -> Option<Locator> {
        self.failed.take()
    }

    fn push_children(&mut self, children: Vec<RemoteEntity>) {
        // Reversed so the first child pops first
        for entity in children.into_iter().rev() {
            let locator = entity.locator();
            match entity.kind {
                // Containers that bear their own resources: emit, then
                // descend
                EntityKind::Project => {
                    self.stack.push(Task::Expand(locator.clone()));
                    self.stack
                        .push(Task::Emit(Box::new(WalkItem { locator, entity })));
                }
                // Pure containers: descend without emitting
                EntityKind::Workspace
                | EntityKind::Artifact
                | EntityKind::ModelRegistryEntry => {
                    self.stack.push(Task::Expand(locator));
                }
                // Leaves
                EntityKind::Experiment
                | EntityKind::ArtifactVersion
                | EntityKind::ModelVersion => {
                    self.stack
                        .push(Task::Emit(Box::new(WalkItem { locator, entity })));
                }
            }
        }
    }
}

/// A directly-addressed entity the walker never saw enumerated. The
/// vendor id is taken from the path segment; display metadata stays
/// unknown.
fn synthesize(locator: &Locator) -> WalkItem {
    let (kind, id, parent) = match locator {
        Locator::Project { workspace, project } => (
            EntityKind::Project,
            project.clone(),
            Locator::workspace(workspace.clone()),
        ),
        Locator::Experiment {
            workspace,
            project,
            experiment,
        } => (
            EntityKind::Experiment,
            experiment.clone(),
            Locator::project(workspace.clone(), project.clone()),
        ),
        Locator::ArtifactVersion {
            workspace,
            name,
            version,
        } => (
            EntityKind::ArtifactVersion,
            version.clone(),
            Locator::Artifact {
                workspace: workspace.clone(),
                name: Some(name.clone()),
            },
        ),
        Locator::ModelVersion {
            workspace,
            name,
            version,
        } => (
            EntityKind::ModelVersion,
            version.clone(),
            Locator::ModelRegistryEntry {
                workspace: workspace.clone(),
                name: Some(name.clone()),
            },
        ),
        other => (
            other.kind(),
            other.workspace_name().to_string(),
            other.clone(),
        ),
    };

    WalkItem {
        locator: locator.clone(),
        entity: RemoteEntity {
            kind,
            id,
            name: None,
            parent,
            last_modified: None,
            child_count: None,
        },
    }
}

/// Size of a migration before it starts.
///
/// Leaf counts prefer vendor-reported totals over enumeration; `exact`
/// is false whenever a reported number was trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationEstimate {
    /// Experiments or versions that will transfer resources.
    pub leaf_entities: u64,
    /// Projects whose project-scoped resources will also transfer.
    pub project_containers: u64,
    pub exact: bool,
}

impl MigrationEstimate {
    /// Whether a caller that prompts should prompt for this migration.
    pub fn needs_confirmation(&self) -> bool {
        self.leaf_entities > EngineConfig::CONFIRM_THRESHOLD
    }
}

/// Count what a pull of `root` would visit, without fetching resources.
///
/// One enumeration level per container; vendor-reported child counts are
/// used where present so a workspace estimate costs one call per project
/// at most.
pub async fn estimate(backend: &DynBackend, root: &Locator) -> Result<MigrationEstimate> {
    let mut totals = MigrationEstimate {
        exact: true,
        ..MigrationEstimate::default()
    };
    if root.is_fully_resolved() {
        totals.leaf_entities = 1;
        return Ok(totals);
    }

    let mut containers: VecDeque<(Locator, Option<u64>)> = VecDeque::new();
    if matches!(root, Locator::Project { .. }) {
        totals.project_containers = 1;
    }
    containers.push_back((root.clone(), None));

    while let Some((parent, reported)) = containers.pop_front() {
        if let Some(count) = reported {
            totals.leaf_entities += count;
            totals.exact = false;
            continue;
        }
        for child in backend.enumerate_children(&parent).await? {
            match child.kind {
                EntityKind::Experiment
                | EntityKind::ArtifactVersion
                | EntityKind::ModelVersion => totals.leaf_entities += 1,
                EntityKind::Project => {
                    totals.project_containers += 1;
                    containers.push_back((child.locator(), child.child_count));
                }
                EntityKind::Artifact | EntityKind::ModelRegistryEntry => {
                    containers.push_back((child.locator(), child.child_count));
                }
                EntityKind::Workspace => {}
            }
        }
    }

    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::error::CaravelError;
    use std::sync::Arc;

    /// Two projects ("alpha" with two experiments, "broken" whose
    /// enumeration fails) under one workspace.
    struct FixtureBackend;

    fn project(name: &str, count: Option<u64>) -> RemoteEntity {
        RemoteEntity {
            kind: EntityKind::Project,
            id: format!("id-{}", name),
            name: Some(name.to_string()),
            parent: Locator::workspace("team"),
            last_modified: None,
            child_count: count,
        }
    }

    fn experiment(parent: &Locator, key: &str) -> RemoteEntity {
        RemoteEntity {
            kind: EntityKind::Experiment,
            id: key.to_string(),
            name: None,
            parent: parent.clone(),
            last_modified: None,
            child_count: None,
        }
    }

    #[async_trait::async_trait]
    impl Backend for FixtureBackend {
        fn name(&self) -> &'static str {
            "fixture"
        }

        fn instance_id(&self) -> &str {
            "fixture@test"
        }

        async fn list_workspaces(&self) -> Result<Vec<RemoteEntity>> {
            Ok(vec![])
        }

        async fn enumerate_children(&self, parent: &Locator) -> Result<Vec<RemoteEntity>> {
            match parent {
                Locator::Workspace { .. } => {
                    Ok(vec![project("alpha", Some(2)), project("broken", None)])
                }
                Locator::Project { project, .. } if project == "alpha" => Ok(vec![
                    experiment(parent, "exp1"),
                    experiment(parent, "exp2"),
                ]),
                Locator::Project { .. } => Err(CaravelError::Network {
                    message: "boom".to_string(),
                    cause: None,
                }),
                _ => Ok(vec![]),
            }
        }

        async fn fetch_resource(
            &self,
            _entity: &Locator,
            _resource: crate::resources::ResourceType,
            _filter: &crate::backend::TransferFilter,
        ) -> Result<Option<crate::backend::ResourcePayload>> {
            Ok(None)
        }

        async fn create_project(
            &self,
            _workspace: &str,
            _project: &str,
            _seed: &crate::backend::ProjectSeed,
        ) -> Result<()> {
            Ok(())
        }

        async fn push_entity(
            &self,
            _dest: &Locator,
            _source: &crate::backend::EntitySnapshot,
        ) -> Result<RemoteEntity> {
            Err(CaravelError::Other("not used".to_string()))
        }

        async fn push_resource(
            &self,
            _dest: &RemoteEntity,
            _resource: crate::resources::ResourceType,
            _payload: &crate::backend::ResourcePayload,
        ) -> Result<()> {
            Ok(())
        }

        async fn link_entity(
            &self,
            _source_experiment: &Locator,
            _dest: &Locator,
        ) -> Result<RemoteEntity> {
            Err(CaravelError::Other("not used".to_string()))
        }
    }

    fn fixture() -> DynBackend {
        Arc::new(FixtureBackend)
    }

    #[tokio::test]
    async fn test_workspace_walk_yields_projects_before_experiments() {
        let mut walker = EntityWalker::new(fixture(), &Locator::workspace("team"));

        let first = walker.next().await.unwrap().unwrap();
        assert_eq!(first.locator, Locator::project("team", "alpha"));
        assert_eq!(first.entity.kind, EntityKind::Project);

        let second = walker.next().await.unwrap().unwrap();
        assert_eq!(second.locator, Locator::experiment("team", "alpha", "exp1"));

        let third = walker.next().await.unwrap().unwrap();
        assert_eq!(third.locator, Locator::experiment("team", "alpha", "exp2"));
    }

    #[tokio::test]
    async fn test_enumeration_failure_drops_frame_and_continues() {
        let mut walker = EntityWalker::new(fixture(), &Locator::workspace("team"));

        // alpha project + its two experiments
        for _ in 0..3 {
            walker.next().await.unwrap().unwrap();
        }

        // broken project container still comes out
        let broken = walker.next().await.unwrap().unwrap();
        assert_eq!(broken.locator, Locator::project("team", "broken"));

        // its expansion fails, attributed to the project
        let err = walker.next().await.unwrap_err();
        assert!(matches!(err, CaravelError::Network { .. }));
        assert_eq!(walker.take_failed(), Some(Locator::project("team", "broken")));

        // and the walk then finishes cleanly
        assert!(walker.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_direct_experiment_yields_no_project_item() {
        let root = Locator::experiment("team", "alpha", "exp1");
        let mut walker = EntityWalker::new(fixture(), &root);

        let only = walker.next().await.unwrap().unwrap();
        assert_eq!(only.locator, root);
        assert_eq!(only.entity.id, "exp1");
        assert!(walker.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_direct_project_yields_container_first() {
        let root = Locator::project("team", "alpha");
        let mut walker = EntityWalker::new(fixture(), &root);

        let first = walker.next().await.unwrap().unwrap();
        assert_eq!(first.locator, root);
        assert_eq!(first.entity.kind, EntityKind::Project);

        let second = walker.next().await.unwrap().unwrap();
        assert_eq!(second.entity.kind, EntityKind::Experiment);
    }

    #[tokio::test]
    async fn test_estimate_counts_project_leaves() {
        let backend = fixture();
        let estimate = super::estimate(&backend, &Locator::project("team", "alpha"))
            .await
            .unwrap();
        assert_eq!(estimate.leaf_entities, 2);
        assert_eq!(estimate.project_containers, 1);
        assert!(estimate.exact);

        let single = super::estimate(&backend, &Locator::experiment("team", "alpha", "e"))
            .await
            .unwrap();
        assert_eq!(single.leaf_entities, 1);
        assert!(single.exact);
        assert!(!single.needs_confirmation());
    }

    #[tokio::test]
    async fn test_estimate_propagates_enumeration_errors() {
        let backend = fixture();
        // alpha's reported count of 2 is trusted; broken has no count,
        // gets enumerated, and fails
        let result = super::estimate(&backend, &Locator::workspace("team")).await;
        assert!(result.is_err());
    }
}
