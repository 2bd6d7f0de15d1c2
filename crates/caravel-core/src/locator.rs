//! Typed addresses for experiment-tracking entities.
//!
//! A locator is parsed from a slash-delimited path string. Plain paths
//! address the workspace/project/experiment hierarchy; the literal second
//! segment `artifacts` or `model-registry` switches to the workspace-scoped
//! versioned object spaces. Parsing is pure string validation, no network.

use crate::error::{CaravelError, Result};

/// The kind of entity a locator addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Workspace,
    Project,
    Experiment,
    Artifact,
    ArtifactVersion,
    ModelRegistryEntry,
    ModelVersion,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Workspace => "workspace",
            EntityKind::Project => "project",
            EntityKind::Experiment => "experiment",
            EntityKind::Artifact => "artifact",
            EntityKind::ArtifactVersion => "artifact-version",
            EntityKind::ModelRegistryEntry => "model-registry-entry",
            EntityKind::ModelVersion => "model-version",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed, validated address for any entity the engine can migrate.
///
/// A locator is either fully resolved (one entity) or partially resolved
/// (a collection the enumerator expands). `name: None` on the artifact and
/// model-registry variants addresses every named object in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Workspace {
        workspace: String,
    },
    Project {
        workspace: String,
        project: String,
    },
    Experiment {
        workspace: String,
        project: String,
        experiment: String,
    },
    Artifact {
        workspace: String,
        name: Option<String>,
    },
    ArtifactVersion {
        workspace: String,
        name: String,
        version: String,
    },
    ModelRegistryEntry {
        workspace: String,
        name: Option<String>,
    },
    ModelVersion {
        workspace: String,
        name: String,
        /// Version number, alias, or stage; the backend resolves which.
        version: String,
    },
}

const ARTIFACTS_MARKER: &str = "artifacts";
const MODEL_REGISTRY_MARKER: &str = "model-registry";
const WILDCARD: &str = "*";

fn malformed(path: &str, segment: &str, reason: &str) -> CaravelError {
    CaravelError::MalformedPath {
        path: path.to_string(),
        segment: segment.to_string(),
        reason: reason.to_string(),
    }
}

impl Locator {
    /// Parse a path string into a locator.
    ///
    /// Leading/trailing slashes and doubled slashes are tolerated. A
    /// trailing `*` experiment segment selects all experiments of the
    /// project; `*` is rejected anywhere else.
    pub fn parse(raw: &str) -> Result<Locator> {
        let cleaned = raw.trim();
        let segments: Vec<&str> = cleaned
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        if segments.is_empty() {
            return Err(malformed(raw, "", "path is empty"));
        }

        let in_artifacts = segments.len() > 1 && segments[1] == ARTIFACTS_MARKER;
        let in_models = segments.len() > 1 && segments[1] == MODEL_REGISTRY_MARKER;

        if in_artifacts || in_models {
            for seg in &segments {
                if *seg == WILDCARD {
                    return Err(malformed(raw, seg, "wildcard is not valid here"));
                }
            }
            let workspace = segments[0].to_string();
            return match (in_artifacts, segments.len()) {
                (true, 2) => Ok(Locator::Artifact {
                    workspace,
                    name: None,
                }),
                (true, 3) => Ok(Locator::Artifact {
                    workspace,
                    name: Some(segments[2].to_string()),
                }),
                (true, 4) => Ok(Locator::ArtifactVersion {
                    workspace,
                    name: segments[2].to_string(),
                    version: segments[3].to_string(),
                }),
                (false, 2) => Ok(Locator::ModelRegistryEntry {
                    workspace,
                    name: None,
                }),
                (false, 3) => Ok(Locator::ModelRegistryEntry {
                    workspace,
                    name: Some(segments[2].to_string()),
                }),
                (false, 4) => Ok(Locator::ModelVersion {
                    workspace,
                    name: segments[2].to_string(),
                    version: segments[3].to_string(),
                }),
                (_, _) => Err(malformed(
                    raw,
                    segments[4],
                    "too many segments, use `workspace/<marker>/name[/version]`",
                )),
            };
        }

        // Plain experiment hierarchy
        if segments.len() > 3 {
            return Err(malformed(
                raw,
                segments[3],
                "too many segments, use `workspace[/project[/experiment]]`",
            ));
        }
        for (i, seg) in segments.iter().enumerate() {
            if *seg == WILDCARD && i != 2 {
                return Err(malformed(raw, seg, "wildcard only selects experiments"));
            }
        }

        let workspace = segments[0].to_string();
        match segments.len() {
            1 => Ok(Locator::Workspace { workspace }),
            2 => Ok(Locator::Project {
                workspace,
                project: segments[1].to_string(),
            }),
            _ => {
                let project = segments[1].to_string();
                if segments[2] == WILDCARD {
                    // `ws/proj/*` means every experiment, same as `ws/proj`
                    Ok(Locator::Project { workspace, project })
                } else {
                    Ok(Locator::Experiment {
                        workspace,
                        project,
                        experiment: segments[2].to_string(),
                    })
                }
            }
        }
    }

    pub fn workspace(workspace: impl Into<String>) -> Locator {
        Locator::Workspace {
            workspace: workspace.into(),
        }
    }

    pub fn project(workspace: impl Into<String>, project: impl Into<String>) -> Locator {
        Locator::Project {
            workspace: workspace.into(),
            project: project.into(),
        }
    }

    pub fn experiment(
        workspace: impl Into<String>,
        project: impl Into<String>,
        experiment: impl Into<String>,
    ) -> Locator {
        Locator::Experiment {
            workspace: workspace.into(),
            project: project.into(),
            experiment: experiment.into(),
        }
    }

    /// The workspace this locator lives in.
    pub fn workspace_name(&self) -> &str {
        match self {
            Locator::Workspace { workspace }
            | Locator::Project { workspace, .. }
            | Locator::Experiment { workspace, .. }
            | Locator::Artifact { workspace, .. }
            | Locator::ArtifactVersion { workspace, .. }
            | Locator::ModelRegistryEntry { workspace, .. }
            | Locator::ModelVersion { workspace, .. } => workspace,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Locator::Workspace { .. } => EntityKind::Workspace,
            Locator::Project { .. } => EntityKind::Project,
            Locator::Experiment { .. } => EntityKind::Experiment,
            Locator::Artifact { .. } => EntityKind::Artifact,
            Locator::ArtifactVersion { .. } => EntityKind::ArtifactVersion,
            Locator::ModelRegistryEntry { .. } => EntityKind::ModelRegistryEntry,
            Locator::ModelVersion { .. } => EntityKind::ModelVersion,
        }
    }

    /// Whether this locator identifies exactly one entity, with nothing
    /// left for the enumerator to expand.
    pub fn is_fully_resolved(&self) -> bool {
        matches!(
            self,
            Locator::Experiment { .. }
                | Locator::ArtifactVersion { .. }
                | Locator::ModelVersion { .. }
        )
    }

    /// Canonical slash-delimited form, re-parseable by [`Locator::parse`].
    pub fn path(&self) -> String {
        match self {
            Locator::Workspace { workspace } => workspace.clone(),
            Locator::Project { workspace, project } => {
                format!("{}/{}", workspace, project)
            }
            Locator::Experiment {
                workspace,
                project,
                experiment,
            } => format!("{}/{}/{}", workspace, project, experiment),
            Locator::Artifact { workspace, name } => match name {
                Some(name) => format!("{}/{}/{}", workspace, ARTIFACTS_MARKER, name),
                None => format!("{}/{}", workspace, ARTIFACTS_MARKER),
            },
            Locator::ArtifactVersion {
                workspace,
                name,
                version,
            } => format!("{}/{}/{}/{}", workspace, ARTIFACTS_MARKER, name, version),
            Locator::ModelRegistryEntry { workspace, name } => match name {
                Some(name) => format!("{}/{}/{}", workspace, MODEL_REGISTRY_MARKER, name),
                None => format!("{}/{}", workspace, MODEL_REGISTRY_MARKER),
            },
            Locator::ModelVersion {
                workspace,
                name,
                version,
            } => format!("{}/{}/{}/{}", workspace, MODEL_REGISTRY_MARKER, name, version),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

impl std::str::FromStr for Locator {
    type Err = CaravelError;

    fn from_str(s: &str) -> Result<Self> {
        Locator::parse(s)
    }
}
