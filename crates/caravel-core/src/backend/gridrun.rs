//! Adapter for GridRun, an external tracking vendor.
//!
//! GridRun's shape differs from the native server in every way that
//! matters here:
//! - Projects have no separate ids; runs are listed with cursor pagination
//! - Run files are a flat listing with direct download URLs; resource
//!   types are recovered by classifying file names
//! - Metric history is fetched per metric, sampled server-side
//! - System and git details both come from one run metadata document
//! - The API is read-only for us; every push operation is refused
//!
//! Runs carry an `updatedAt` stamp, which is what makes incremental sync
//! possible against this vendor and nothing else.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::backend::{
    Backend, EntitySnapshot, ProjectSeed, RemoteEntity, ResourceFile, ResourcePayload,
    SyncWatermark, TransferFilter,
};
use crate::config::{EngineConfig, NetworkConfig, StoreConfig};
use crate::error::{CaravelError, Result};
use crate::locator::{EntityKind, Locator};
use crate::network::{extract_domain, HttpClient};
use crate::resources::ResourceType;

/// File extensions GridRun users upload trained models under.
const MODEL_EXTENSIONS: [&str; 7] = [".pb", ".onnx", ".pkl", ".mlmodel", ".pmml", ".pt", ".h5"];

/// Run file the vendor writes its own metadata document to.
const RUN_METADATA_FILE: &str = "run-metadata.json";

/// Run file holding the uncommitted diff at launch time.
const RUN_DIFF_FILE: &str = "diff.patch";

const GIT_PATCH_README: &str = "\
git_metadata.json records the repository origin and parent commit of
this run. git_diff.patch holds the changes that were uncommitted when it
started. Check out the parent commit and run:

    git apply git_diff.patch
";

/// Connection settings for one GridRun deployment.
#[derive(Debug, Clone)]
pub struct GridRunConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl GridRunConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        GridRunConfig {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: NetworkConfig::REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Read-only REST adapter for GridRun.
pub struct GridRunBackend {
    http: HttpClient,
    base_url: String,
    instance: String,
}

impl GridRunBackend {
    pub fn new(config: GridRunConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let http = HttpClient::with_auth(config.timeout, "X-Api-Key", &config.api_key)?;
        let instance = format!("gridrun@{}", extract_domain(&base_url));
        Ok(GridRunBackend {
            http,
            base_url,
            instance,
        })
    }

    fn api_url(&self, path_and_query: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path_and_query)
    }

    fn read_only(&self, operation: impl Into<String>) -> CaravelError {
        CaravelError::PermissionDenied {
            what: format!("GridRun is read-only: {}", operation.into()),
        }
    }

    // ========================================
    // Enumeration
    // ========================================

    async fn list_projects(&self, workspace: &str) -> Result<Vec<RemoteEntity>> {
        let url = self.api_url(&format!(
            "/workspaces/{}/projects",
            urlencoding::encode(workspace)
        ));
        let response: ProjectsResponse = self.http.get_json(&url).await?;
        let parent = Locator::workspace(workspace);
        Ok(response
            .projects
            .into_iter()
            .map(|dto| RemoteEntity {
                kind: EntityKind::Project,
                // GridRun addresses projects by name; there is no other id
                id: dto.name.clone(),
                name: Some(dto.name),
                parent: parent.clone(),
                last_modified: dto.updated_at,
                child_count: dto.run_count,
            })
            .collect())
    }

    async fn list_runs(&self, workspace: &str, project: &str) -> Result<Vec<RemoteEntity>> {
        let parent = Locator::project(workspace, project);
        let mut entities = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut url = self.api_url(&format!(
                "/workspaces/{}/projects/{}/runs?limit={}",
                urlencoding::encode(workspace),
                urlencoding::encode(project),
                NetworkConfig::PAGE_SIZE
            ));
            if let Some(c) = &cursor {
                url.push_str(&format!("&cursor={}", urlencoding::encode(c)));
            }

            let response: RunsResponse = self.http.get_json(&url).await?;
            entities.extend(response.runs.into_iter().map(|dto| RemoteEntity {
                kind: EntityKind::Experiment,
                id: dto.id,
                name: dto.display_name,
                parent: parent.clone(),
                last_modified: dto.updated_at,
                child_count: None,
            }));

            match response.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!("Enumerated {} runs in {}/{}", entities.len(), workspace, project);
        Ok(entities)
    }

    async fn run_detail(&self, run_id: &str) -> Result<RunDetailDto> {
        let url = self.api_url(&format!("/runs/{}", urlencoding::encode(run_id)));
        self.http.get_json(&url).await
    }

    async fn run_files(&self, run_id: &str) -> Result<Vec<GridFileDto>> {
        let url = self.api_url(&format!("/runs/{}/files", urlencoding::encode(run_id)));
        let response: FilesResponse = self.http.get_json(&url).await?;
        Ok(response.files)
    }

    // ========================================
    // Resource Fetches
    // ========================================

    async fn fetch_metrics(
        &self,
        run_id: &str,
        filter: &TransferFilter,
    ) -> Result<Option<ResourcePayload>> {
        let url = self.api_url(&format!("/runs/{}/metrics", urlencoding::encode(run_id)));
        let listing: MetricNamesResponse = self.http.get_json(&url).await?;

        let mut lines: Vec<u8> = Vec::new();
        for name in listing.metrics {
            if should_skip_metric(&name, filter) {
                continue;
            }
            let url = self.api_url(&format!(
                "/runs/{}/metrics/{}?samples={}",
                urlencoding::encode(run_id),
                urlencoding::encode(&name),
                EngineConfig::MAX_METRIC_SAMPLES
            ));
            let history: MetricHistoryResponse = self.http.get_json(&url).await?;
            append_metric_rows(&mut lines, &name, &history.rows)?;
        }

        if lines.is_empty() {
            return Ok(None);
        }
        Ok(Some(ResourcePayload::single("metrics.jsonl", lines)))
    }

    async fn fetch_parameters(&self, run_id: &str) -> Result<Option<ResourcePayload>> {
        let detail = self.run_detail(run_id).await?;
        let parameters = parameters_from_config(&detail.config);
        if parameters.is_empty() {
            return Ok(None);
        }
        Ok(Some(ResourcePayload::single(
            "parameters.json",
            pretty_json(&parameters)?,
        )))
    }

    async fn fetch_others(&self, run_id: &str) -> Result<Option<ResourcePayload>> {
        let detail = self.run_detail(run_id).await?;
        let others = others_from_run(&detail);
        Ok(Some(ResourcePayload::single(
            "others.jsonl",
            json_lines(&others)?,
        )))
    }

    async fn fetch_system(&self, run_id: &str) -> Result<Option<ResourcePayload>> {
        let Some(metadata) = self.run_metadata(run_id).await? else {
            return Ok(None);
        };
        let details = system_details_from_metadata(&metadata);
        Ok(Some(ResourcePayload::single(
            "system_details.json",
            pretty_json(&details)?,
        )))
    }

    async fn fetch_git(&self, run_id: &str) -> Result<Option<ResourcePayload>> {
        let mut payload = ResourcePayload::default();

        if let Some(metadata) = self.run_metadata(run_id).await? {
            if let Some(git) = git_metadata_from_metadata(&metadata) {
                payload.files.push(ResourceFile::new(
                    StoreConfig::GIT_METADATA_FILENAME,
                    pretty_json(&git)?,
                ));
            }
        }

        let files = self.run_files(run_id).await?;
        if let Some(diff) = files.iter().find(|f| classify_file(&f.name) == FileClass::GitPatch) {
            let bytes = self.http.get_bytes(&diff.direct_url).await?;
            payload
                .files
                .push(ResourceFile::new(StoreConfig::GIT_PATCH_FILENAME, bytes));
            payload.files.push(ResourceFile::new(
                StoreConfig::GIT_README_FILENAME,
                GIT_PATCH_README.as_bytes().to_vec(),
            ));
        }

        Ok(if payload.is_empty() { None } else { Some(payload) })
    }

    /// Resources recovered from the run's file listing: code, output,
    /// requirements, the model graph, and everything that lands in assets.
    async fn fetch_classified(
        &self,
        run_id: &str,
        resource: ResourceType,
        filter: &TransferFilter,
    ) -> Result<Option<ResourcePayload>> {
        let files = self.run_files(run_id).await?;
        let mut payload = ResourcePayload::default();
        let mut transferred: Vec<&GridFileDto> = Vec::new();

        for file in &files {
            let class = classify_file(&file.name);
            let Some((target, rel_path, asset_type)) = class.placement(&file.name) else {
                continue;
            };
            if target != resource {
                continue;
            }
            let keep = match asset_type {
                Some(kind) => filter.matches_asset(kind, leaf_name(&file.name)),
                None => filter.matches_filename(&file.name),
            };
            if !keep {
                continue;
            }

            let bytes = self.http.get_bytes(&file.direct_url).await?;
            let mut rf = ResourceFile::new(rel_path, bytes);
            if let Some(sha) = &file.sha256 {
                rf = rf.with_sha256(sha.clone());
            }
            payload.files.push(rf);
            transferred.push(file);
        }

        if payload.is_empty() {
            return Ok(None);
        }
        if resource == ResourceType::Assets {
            payload.files.insert(
                0,
                ResourceFile::new(
                    StoreConfig::ASSETS_METADATA_FILENAME,
                    json_lines(&transferred)?,
                ),
            );
        }
        Ok(Some(payload))
    }

    async fn run_metadata(&self, run_id: &str) -> Result<Option<Value>> {
        let files = self.run_files(run_id).await?;
        let Some(meta) = files.iter().find(|f| f.name == RUN_METADATA_FILE) else {
            return Ok(None);
        };
        let bytes = self.http.get_bytes(&meta.direct_url).await?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CaravelError::Json {
                message: format!("Malformed run metadata document: {}", e),
                source: Some(e),
            })
    }

    async fn fetch_project_metadata(
        &self,
        workspace: &str,
        project: &str,
    ) -> Result<Option<ResourcePayload>> {
        let url = self.api_url(&format!(
            "/workspaces/{}/projects",
            urlencoding::encode(workspace)
        ));
        let response: ProjectsResponse = self.http.get_json(&url).await?;
        let Some(detail) = response.projects.into_iter().find(|p| p.name == project) else {
            return Err(CaravelError::NotFound {
                what: format!("Project {}/{}", workspace, project),
            });
        };
        Ok(Some(ResourcePayload::single(
            "project_metadata.json",
            pretty_json(&detail)?,
        )))
    }
}

#[async_trait]
impl Backend for GridRunBackend {
    fn name(&self) -> &'static str {
        "gridrun"
    }

    fn instance_id(&self) -> &str {
        &self.instance
    }

    async fn list_workspaces(&self) -> Result<Vec<RemoteEntity>> {
        let url = self.api_url("/workspaces");
        let response: WorkspacesResponse = self.http.get_json(&url).await?;
        Ok(response
            .workspaces
            .into_iter()
            .map(|name| RemoteEntity {
                kind: EntityKind::Workspace,
                id: name.clone(),
                name: None,
                parent: Locator::workspace(name),
                last_modified: None,
                child_count: None,
            })
            .collect())
    }

    async fn enumerate_children(&self, parent: &Locator) -> Result<Vec<RemoteEntity>> {
        match parent {
            Locator::Workspace { workspace } => self.list_projects(workspace).await,
            Locator::Project { workspace, project } => self.list_runs(workspace, project).await,
            Locator::Artifact { .. }
            | Locator::ArtifactVersion { .. }
            | Locator::ModelRegistryEntry { .. }
            | Locator::ModelVersion { .. } => Err(CaravelError::Unsupported {
                backend: "gridrun".to_string(),
                operation: "artifact and model registry traversal".to_string(),
            }),
            Locator::Experiment { .. } => Ok(Vec::new()),
        }
    }

    async fn fetch_resource(
        &self,
        entity: &Locator,
        resource: ResourceType,
        filter: &TransferFilter,
    ) -> Result<Option<ResourcePayload>> {
        match entity {
            Locator::Experiment { experiment, .. } => match resource {
                ResourceType::Metrics => self.fetch_metrics(experiment, filter).await,
                ResourceType::Parameters => self.fetch_parameters(experiment).await,
                ResourceType::Others => self.fetch_others(experiment).await,
                ResourceType::System => self.fetch_system(experiment).await,
                ResourceType::Git => self.fetch_git(experiment).await,
                ResourceType::Code
                | ResourceType::Output
                | ResourceType::Requirements
                | ResourceType::Graph
                | ResourceType::Assets => {
                    self.fetch_classified(experiment, resource, filter).await
                }
                // GridRun has no html/metadata documents for runs
                _ => Ok(None),
            },
            Locator::Project { workspace, project } => match resource {
                ResourceType::ProjectMetadata => {
                    self.fetch_project_metadata(workspace, project).await
                }
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    async fn create_project(
        &self,
        workspace: &str,
        project: &str,
        _seed: &ProjectSeed,
    ) -> Result<()> {
        Err(self.read_only(format!("creating project {}/{}", workspace, project)))
    }

    async fn push_entity(&self, dest: &Locator, _source: &EntitySnapshot) -> Result<RemoteEntity> {
        Err(self.read_only(format!("creating an experiment under {}", dest)))
    }

    async fn push_resource(
        &self,
        dest: &RemoteEntity,
        resource: ResourceType,
        _payload: &ResourcePayload,
    ) -> Result<()> {
        Err(self.read_only(format!("uploading {} to {}", resource, dest.display_name())))
    }

    async fn link_entity(
        &self,
        source_experiment: &Locator,
        _dest: &Locator,
    ) -> Result<RemoteEntity> {
        Err(self.read_only(format!("symlinking {}", source_experiment)))
    }

    fn supports_incremental_sync(&self) -> bool {
        true
    }

    async fn resources_changed_since(
        &self,
        entity: &Locator,
        watermark: &SyncWatermark,
    ) -> Result<BTreeSet<ResourceType>> {
        let Locator::Experiment { experiment, .. } = entity else {
            return Ok(BTreeSet::new());
        };
        let detail = self.run_detail(experiment).await?;
        Ok(changed_resources(detail.updated_at, watermark))
    }
}

// ========================================
// File Classification
// ========================================

/// What one vendor file is, decided from its name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileClass {
    Graph,
    Code,
    Output,
    Requirements,
    GitPatch,
    /// The vendor metadata document; consumed by system/git fetches.
    Metadata,
    Asset(AssetKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetKind {
    Artifact,
    Image,
    Model,
    Summary,
    Other,
}

impl AssetKind {
    fn as_str(self) -> &'static str {
        match self {
            AssetKind::Artifact => "artifact",
            AssetKind::Image => "image",
            AssetKind::Model => "model-element",
            AssetKind::Summary => "summary",
            AssetKind::Other => "other",
        }
    }
}

impl FileClass {
    /// Where this file lands: resource type, store-relative path, and the
    /// asset type when it lands in assets. `None` for files consumed
    /// elsewhere (the metadata document and the git patch).
    fn placement(self, name: &str) -> Option<(ResourceType, String, Option<&'static str>)> {
        match self {
            FileClass::Graph => Some((
                ResourceType::Graph,
                "graph_definition.txt".to_string(),
                None,
            )),
            FileClass::Code => {
                let rel = name.strip_prefix("code/").unwrap_or(name);
                Some((ResourceType::Code, rel.to_string(), None))
            }
            FileClass::Output => Some((ResourceType::Output, "output.txt".to_string(), None)),
            FileClass::Requirements => Some((
                ResourceType::Requirements,
                "requirements.txt".to_string(),
                None,
            )),
            FileClass::Asset(kind) => {
                let rel = match kind {
                    // artifact files keep their artifact/<id>/<name> nesting
                    AssetKind::Artifact => name.to_string(),
                    _ => format!("{}/{}", kind.as_str(), leaf_name(name)),
                };
                Some((ResourceType::Assets, rel, Some(kind.as_str())))
            }
            FileClass::GitPatch | FileClass::Metadata => None,
        }
    }
}

fn classify_file(name: &str) -> FileClass {
    if name.starts_with("artifact/") {
        FileClass::Asset(AssetKind::Artifact)
    } else if name.starts_with("media/graph") {
        FileClass::Graph
    } else if name.starts_with("code/") {
        FileClass::Code
    } else if name == "output.log" {
        FileClass::Output
    } else if name == "requirements.txt" {
        FileClass::Requirements
    } else if name == RUN_DIFF_FILE {
        FileClass::GitPatch
    } else if name == RUN_METADATA_FILE {
        FileClass::Metadata
    } else if name == "summary.json" {
        FileClass::Asset(AssetKind::Summary)
    } else if name.contains("media/images") {
        FileClass::Asset(AssetKind::Image)
    } else if MODEL_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
        FileClass::Asset(AssetKind::Model)
    } else {
        FileClass::Asset(AssetKind::Other)
    }
}

fn leaf_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

// ========================================
// Conversions
// ========================================

/// Vendor-internal metric columns start with `_`; those never transfer.
fn should_skip_metric(name: &str, filter: &TransferFilter) -> bool {
    name.starts_with('_') || !filter.metric_allowed(name)
}

fn append_metric_rows(out: &mut Vec<u8>, metric: &str, rows: &[MetricRowDto]) -> Result<()> {
    for row in rows {
        // Null values are placeholders the vendor emits for sparse steps
        let Some(value) = row.value else {
            continue;
        };
        if value.is_nan() {
            continue;
        }
        let record = serde_json::json!({
            "metricName": metric,
            "metricValue": value,
            "timestamp": row.timestamp.map(|t| (t * 1000.0) as i64),
            "step": row.step,
            "epoch": null,
        });
        let line = serde_json::to_string(&record).map_err(|e| CaravelError::Json {
            message: format!("Failed to serialize metric row: {}", e),
            source: Some(e),
        })?;
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
    }
    Ok(())
}

fn parameters_from_config(config: &Map<String, Value>) -> Vec<Value> {
    config
        .iter()
        .map(|(key, value)| {
            serde_json::json!({
                "name": key,
                "valueCurrent": value,
                "valueMax": value,
                "valueMin": value,
                "editable": false,
            })
        })
        .collect()
}

/// Name, origin URL, and the group/run split GridRun encodes in names
/// like `sweep-7-run-3`.
fn others_from_run(detail: &RunDetailDto) -> Vec<Value> {
    let name = detail
        .display_name
        .clone()
        .unwrap_or_else(|| detail.id.clone());
    let (group, run) = match name.rsplit_once("-run-") {
        Some((group, count)) => (group.to_string(), format!("run-{}", count)),
        None => (name.clone(), name.clone()),
    };

    let mut others = vec![
        serde_json::json!({ "name": "Name", "valueCurrent": name }),
        serde_json::json!({ "name": "Group", "valueCurrent": group }),
        serde_json::json!({ "name": "Run", "valueCurrent": run }),
    ];
    if let Some(url) = &detail.url {
        others.push(serde_json::json!({ "name": "origin", "valueCurrent": url }));
    }
    others
}

fn system_details_from_metadata(metadata: &Value) -> Value {
    let command = match (metadata.get("program"), metadata.get("args")) {
        (Some(program), Some(Value::Array(args))) if !args.is_empty() => {
            let mut command = vec![program.clone()];
            command.extend(args.iter().cloned());
            Value::Array(command)
        }
        (Some(program), _) => Value::Array(vec![program.clone()]),
        _ => Value::Null,
    };

    serde_json::json!({
        "command": command,
        "hostname": metadata.get("host"),
        "osType": metadata.get("os"),
        "osRelease": metadata.get("os"),
        "executable": metadata.get("executable"),
        "pythonVersion": metadata.get("python"),
        "user": metadata.get("username"),
    })
}

fn git_metadata_from_metadata(metadata: &Value) -> Option<Value> {
    let git = metadata.get("git")?;
    Some(serde_json::json!({
        "parent": git.get("commit"),
        "origin": git.get("remote"),
        "branch": git.get("branch"),
        "user": null,
        "root": null,
    }))
}

/// Which resources a run's `updatedAt` invalidates relative to the
/// watermark. GridRun does not say what changed, so a newer stamp means
/// every run-scoped resource is suspect.
fn changed_resources(
    updated_at: Option<DateTime<Utc>>,
    watermark: &SyncWatermark,
) -> BTreeSet<ResourceType> {
    let marker = DateTime::parse_from_rfc3339(&watermark.marker)
        .map(|dt| dt.with_timezone(&Utc))
        .ok();
    let unchanged = match (updated_at, marker) {
        (Some(updated), Some(mark)) => updated <= mark,
        // Without a usable pair of stamps, assume changed
        _ => false,
    };
    if unchanged {
        return BTreeSet::new();
    }

    [
        ResourceType::Assets,
        ResourceType::Code,
        ResourceType::Git,
        ResourceType::Graph,
        ResourceType::Metrics,
        ResourceType::Others,
        ResourceType::Output,
        ResourceType::Parameters,
        ResourceType::Requirements,
        ResourceType::System,
    ]
    .into_iter()
    .collect()
}

// ========================================
// Payload Helpers
// ========================================

fn pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| CaravelError::Json {
        message: format!("Failed to serialize document: {}", e),
        source: Some(e),
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn json_lines<T: Serialize>(values: &[T]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for value in values {
        let line = serde_json::to_string(value).map_err(|e| CaravelError::Json {
            message: format!("Failed to serialize record: {}", e),
            source: Some(e),
        })?;
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

// ========================================
// Wire DTOs
// ========================================

#[derive(Debug, Deserialize)]
struct WorkspacesResponse {
    workspaces: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectsResponse {
    projects: Vec<GridProjectDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridProjectDto {
    name: String,
    #[serde(default)]
    run_count: Option<u64>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunsResponse {
    runs: Vec<RunDto>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunDto {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunDetailDto {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    config: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct FilesResponse {
    files: Vec<GridFileDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridFileDto {
    name: String,
    #[serde(default)]
    size_bytes: Option<u64>,
    direct_url: String,
    #[serde(default)]
    sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetricNamesResponse {
    metrics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MetricHistoryResponse {
    rows: Vec<MetricRowDto>,
}

#[derive(Debug, Deserialize)]
struct MetricRowDto {
    #[serde(default)]
    step: Option<i64>,
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    value: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> GridRunBackend {
        GridRunBackend::new(GridRunConfig::new("https://api.gridrun.io", "grk-1")).unwrap()
    }

    #[test]
    fn test_instance_id() {
        let backend = setup();
        assert_eq!(backend.instance_id(), "gridrun@api.gridrun.io");
        assert!(backend.supports_incremental_sync());
    }

    #[test]
    fn test_classify_file() {
        assert_eq!(classify_file("media/graph/graph.txt"), FileClass::Graph);
        assert_eq!(classify_file("code/train.py"), FileClass::Code);
        assert_eq!(classify_file("output.log"), FileClass::Output);
        assert_eq!(classify_file("requirements.txt"), FileClass::Requirements);
        assert_eq!(classify_file("diff.patch"), FileClass::GitPatch);
        assert_eq!(classify_file("run-metadata.json"), FileClass::Metadata);
        assert_eq!(
            classify_file("artifact/a1/data.csv"),
            FileClass::Asset(AssetKind::Artifact)
        );
        assert_eq!(
            classify_file("media/images/plot.png"),
            FileClass::Asset(AssetKind::Image)
        );
        assert_eq!(
            classify_file("checkpoints/model.onnx"),
            FileClass::Asset(AssetKind::Model)
        );
        assert_eq!(
            classify_file("summary.json"),
            FileClass::Asset(AssetKind::Summary)
        );
        assert_eq!(
            classify_file("notes/scratch.txt"),
            FileClass::Asset(AssetKind::Other)
        );
    }

    #[test]
    fn test_placement() {
        let (resource, rel, _) = FileClass::Code.placement("code/train.py").unwrap();
        assert_eq!(resource, ResourceType::Code);
        assert_eq!(rel, "train.py");

        let (resource, rel, kind) = FileClass::Asset(AssetKind::Image)
            .placement("media/images/step_5/plot.png")
            .unwrap();
        assert_eq!(resource, ResourceType::Assets);
        assert_eq!(rel, "image/plot.png");
        assert_eq!(kind, Some("image"));

        assert!(FileClass::Metadata.placement("run-metadata.json").is_none());
        assert!(FileClass::GitPatch.placement("diff.patch").is_none());
    }

    #[test]
    fn test_should_skip_metric() {
        let filter = TransferFilter::default()
            .with_metric_excludes(&["^gpu\\."])
            .unwrap();
        assert!(should_skip_metric("_step", &filter));
        assert!(should_skip_metric("_timestamp", &filter));
        assert!(should_skip_metric("gpu.mem", &filter));
        assert!(!should_skip_metric("loss", &filter));
    }

    #[test]
    fn test_append_metric_rows_skips_gaps() {
        let rows = vec![
            MetricRowDto {
                step: Some(1),
                timestamp: Some(1_700_000_000.5),
                value: Some(0.25),
            },
            MetricRowDto {
                step: Some(2),
                timestamp: Some(1_700_000_001.0),
                value: None,
            },
            MetricRowDto {
                step: Some(3),
                timestamp: None,
                value: Some(f64::NAN),
            },
        ];
        let mut out = Vec::new();
        append_metric_rows(&mut out, "loss", &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"metricValue\":0.25"));
        assert!(lines[0].contains("\"timestamp\":1700000000500"));
    }

    #[test]
    fn test_parameters_from_config() {
        let mut config = Map::new();
        config.insert("lr".to_string(), serde_json::json!(0.001));
        config.insert("optimizer".to_string(), serde_json::json!("adam"));

        let parameters = parameters_from_config(&config);
        assert_eq!(parameters.len(), 2);
        assert_eq!(parameters[0]["name"], "lr");
        assert_eq!(parameters[0]["valueCurrent"], 0.001);
        assert_eq!(parameters[0]["editable"], false);
    }

    #[test]
    fn test_others_group_split() {
        let detail = RunDetailDto {
            id: "r1".to_string(),
            display_name: Some("sweep-7-run-3".to_string()),
            url: Some("https://app.gridrun.io/r1".to_string()),
            updated_at: None,
            config: Map::new(),
        };
        let others = others_from_run(&detail);
        assert_eq!(others[1]["name"], "Group");
        assert_eq!(others[1]["valueCurrent"], "sweep-7");
        assert_eq!(others[2]["valueCurrent"], "run-3");

        let plain = RunDetailDto {
            id: "r2".to_string(),
            display_name: Some("baseline".to_string()),
            url: None,
            updated_at: None,
            config: Map::new(),
        };
        let others = others_from_run(&plain);
        assert_eq!(others[1]["valueCurrent"], "baseline");
        assert_eq!(others[2]["valueCurrent"], "baseline");
    }

    #[test]
    fn test_system_details_mapping() {
        let metadata = serde_json::json!({
            "program": "train.py",
            "args": ["--epochs", "10"],
            "host": "node-4",
            "os": "Linux-6.1",
            "executable": "/usr/bin/python3",
            "python": "3.11.4",
            "username": "ada",
        });
        let details = system_details_from_metadata(&metadata);
        assert_eq!(details["command"][0], "train.py");
        assert_eq!(details["command"][2], "10");
        assert_eq!(details["hostname"], "node-4");
        assert_eq!(details["user"], "ada");
    }

    #[test]
    fn test_git_metadata_extraction() {
        let metadata = serde_json::json!({
            "git": { "commit": "abc123", "remote": "git@host:repo.git" }
        });
        let git = git_metadata_from_metadata(&metadata).unwrap();
        assert_eq!(git["parent"], "abc123");
        assert_eq!(git["origin"], "git@host:repo.git");

        assert!(git_metadata_from_metadata(&serde_json::json!({})).is_none());
    }

    #[test]
    fn test_changed_resources() {
        let watermark = SyncWatermark::new("2026-01-10T08:00:00+00:00");

        let older = "2026-01-09T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(changed_resources(Some(older), &watermark).is_empty());

        let newer = "2026-02-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let changed = changed_resources(Some(newer), &watermark);
        assert!(changed.contains(&ResourceType::Metrics));
        assert!(!changed.contains(&ResourceType::ProjectNotes));

        // no stamp on the run means we cannot prove it unchanged
        assert!(!changed_resources(None, &watermark).is_empty());
    }

    #[tokio::test]
    async fn test_push_operations_are_refused() {
        let backend = setup();
        let seed = ProjectSeed::default();
        let err = backend.create_project("team", "vision", &seed).await.unwrap_err();
        assert!(matches!(err, CaravelError::PermissionDenied { .. }));

        let snapshot = EntitySnapshot {
            source_path: "team/vision/run1".to_string(),
            id: "run1".to_string(),
            name: None,
            resources: vec![],
        };
        let err = backend
            .push_entity(&Locator::project("team", "vision"), &snapshot)
            .await
            .unwrap_err();
        assert!(matches!(err, CaravelError::PermissionDenied { .. }));

        let err = backend
            .link_entity(
                &Locator::experiment("team", "vision", "run1"),
                &Locator::project("team", "mirror"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CaravelError::PermissionDenied { .. }));
    }
}
