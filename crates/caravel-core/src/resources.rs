//! Resource catalog: the types of data attached to tracked entities.
//!
//! Fourteen concrete resource types plus two aliases (`run`, `project`)
//! that expand to groups. Selection resolution is a pure table: no IO, no
//! network, deterministic for a given include/ignore pair.

use std::collections::BTreeSet;

use crate::error::{CaravelError, Result};

/// One category of attached experiment/project data.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Assets,
    Html,
    Metadata,
    Metrics,
    Others,
    Parameters,
    ProjectNotes,
    ProjectMetadata,
    System,
    Code,
    Git,
    Output,
    Graph,
    Requirements,
}

/// Where a resource lives in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
    /// Written once per project.
    Project,
    /// Written per experiment (and per artifact/model version).
    Experiment,
}

/// Alias name -> expansion, mirrored by [`ResourceType::alias_members`].
const ALIAS_RUN: &[ResourceType] = &[
    ResourceType::Code,
    ResourceType::Requirements,
    ResourceType::Git,
    ResourceType::Output,
    ResourceType::Graph,
];
const ALIAS_PROJECT: &[ResourceType] = &[
    ResourceType::ProjectMetadata,
    ResourceType::ProjectNotes,
];

/// Prefix marking an ignore entry as a metric-name pattern rather than a
/// resource type, e.g. `metrics:val_.*`.
pub const METRIC_PATTERN_PREFIX: &str = "metrics:";

impl ResourceType {
    /// Every concrete resource type, in processing order.
    pub const ALL: [ResourceType; 14] = [
        ResourceType::Assets,
        ResourceType::Html,
        ResourceType::Metadata,
        ResourceType::Metrics,
        ResourceType::Others,
        ResourceType::Parameters,
        ResourceType::ProjectNotes,
        ResourceType::ProjectMetadata,
        ResourceType::System,
        ResourceType::Code,
        ResourceType::Git,
        ResourceType::Output,
        ResourceType::Graph,
        ResourceType::Requirements,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Assets => "assets",
            ResourceType::Html => "html",
            ResourceType::Metadata => "metadata",
            ResourceType::Metrics => "metrics",
            ResourceType::Others => "others",
            ResourceType::Parameters => "parameters",
            ResourceType::ProjectNotes => "project_notes",
            ResourceType::ProjectMetadata => "project_metadata",
            ResourceType::System => "system",
            ResourceType::Code => "code",
            ResourceType::Git => "git",
            ResourceType::Output => "output",
            ResourceType::Graph => "graph",
            ResourceType::Requirements => "requirements",
        }
    }

    pub fn from_name(name: &str) -> Option<ResourceType> {
        ResourceType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == name)
    }

    /// Members of an alias group, if `name` is an alias.
    pub fn alias_members(name: &str) -> Option<&'static [ResourceType]> {
        match name {
            "run" => Some(ALIAS_RUN),
            "project" => Some(ALIAS_PROJECT),
            _ => None,
        }
    }

    pub fn scope(&self) -> ResourceScope {
        match self {
            ResourceType::ProjectNotes | ResourceType::ProjectMetadata => ResourceScope::Project,
            _ => ResourceScope::Experiment,
        }
    }

    /// Directory this resource occupies under an entity directory.
    pub fn dir_name(&self) -> &'static str {
        self.as_str()
    }

    /// Fixed file name for single-file resources. `None` for resources
    /// whose file set is dynamic (assets) or multi-file (git).
    pub fn primary_filename(&self) -> Option<&'static str> {
        match self {
            ResourceType::Assets | ResourceType::Git => None,
            ResourceType::Html => Some("experiment.html"),
            ResourceType::Metadata => Some("metadata.json"),
            ResourceType::Metrics => Some("metrics.jsonl"),
            ResourceType::Others => Some("others.jsonl"),
            ResourceType::Parameters => Some("parameters.json"),
            ResourceType::ProjectNotes => Some("project_notes.md"),
            ResourceType::ProjectMetadata => Some("project_metadata.json"),
            ResourceType::System => Some("system_details.json"),
            ResourceType::Code => Some("script.py"),
            ResourceType::Output => Some("output.txt"),
            ResourceType::Graph => Some("graph_definition.txt"),
            ResourceType::Requirements => Some("requirements.txt"),
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resolved set of resource types plus any metric-name exclusion
/// patterns carried along from the ignore list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSelection {
    selected: BTreeSet<ResourceType>,
    metric_excludes: Vec<String>,
}

fn expand<S: AsRef<str>>(names: &[S]) -> Result<BTreeSet<ResourceType>> {
    let mut out = BTreeSet::new();
    for name in names {
        let name = name.as_ref();
        if let Some(members) = ResourceType::alias_members(name) {
            out.extend(members.iter().copied());
        } else if let Some(rtype) = ResourceType::from_name(name) {
            out.insert(rtype);
        } else {
            return Err(CaravelError::UnknownResource {
                name: name.to_string(),
            });
        }
    }
    Ok(out)
}

impl ResourceSelection {
    /// Every known resource type, nothing excluded.
    pub fn all() -> Self {
        Self {
            selected: ResourceType::ALL.iter().copied().collect(),
            metric_excludes: Vec::new(),
        }
    }

    /// Just the given types, nothing excluded.
    pub fn only(types: &[ResourceType]) -> Self {
        Self {
            selected: types.iter().copied().collect(),
            metric_excludes: Vec::new(),
        }
    }

    /// Resolve raw include and ignore name lists into a selection.
    ///
    /// Aliases expand in both lists; an empty include list means every
    /// known type; ignore entries are subtracted after expansion, so
    /// ignore always wins. Ignore entries prefixed `metrics:` are metric
    /// name patterns, set aside rather than matched against the catalog.
    /// Any other unknown name in either list is an error naming the token.
    pub fn resolve<S: AsRef<str>>(include: &[S], ignore: &[S]) -> Result<ResourceSelection> {
        let mut metric_excludes = Vec::new();
        let mut ignore_names: Vec<&str> = Vec::new();
        for entry in ignore {
            let entry = entry.as_ref();
            if let Some(pattern) = entry.strip_prefix(METRIC_PATTERN_PREFIX) {
                metric_excludes.push(pattern.to_string());
            } else {
                ignore_names.push(entry);
            }
        }

        let included = if include.is_empty() {
            ResourceType::ALL.iter().copied().collect()
        } else {
            expand(include)?
        };
        let ignored = expand(&ignore_names)?;

        Ok(ResourceSelection {
            selected: included.difference(&ignored).copied().collect(),
            metric_excludes,
        })
    }

    /// Selected types in stable order.
    pub fn selected(&self) -> impl Iterator<Item = ResourceType> + '_ {
        self.selected.iter().copied()
    }

    pub fn contains(&self, rtype: ResourceType) -> bool {
        self.selected.contains(&rtype)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    /// Metric-name exclusion patterns from `metrics:<regex>` ignores.
    pub fn metric_excludes(&self) -> &[String] {
        &self.metric_excludes
    }

    /// Subset with the given scope, in stable order.
    pub fn with_scope(&self, scope: ResourceScope) -> Vec<ResourceType> {
        self.selected()
            .filter(|t| t.scope() == scope)
            .collect()
    }

    /// Remove types, keeping metric excludes. Used by incremental sync to
    /// prune unchanged resources.
    pub fn retain(&self, keep: &BTreeSet<ResourceType>) -> ResourceSelection {
        ResourceSelection {
            selected: self.selected.intersection(keep).copied().collect(),
            metric_excludes: self.metric_excludes.clone(),
        }
    }
}

impl Default for ResourceSelection {
    fn default() -> Self {
        Self::all()
    }
}
