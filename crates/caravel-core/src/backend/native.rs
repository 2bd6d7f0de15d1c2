//! Adapter for a caravel-native tracking server.
//!
//! Speaks the native REST API:
//! - Workspace / project / experiment enumeration with pagination
//! - Per-resource experiment fetches, streamed asset downloads
//! - Artifact and model registry traversal, stage-aware version lookup
//! - Additive push: project/experiment creation, resource upload, symlinks

use std::io::{Cursor, Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use mini_moka::sync::Cache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::backend::{
    Backend, EntitySnapshot, ProjectSeed, RemoteEntity, ResourceFile, ResourcePayload,
    TransferFilter,
};
use crate::config::{NetworkConfig, StoreConfig};
use crate::error::{CaravelError, Result};
use crate::locator::{EntityKind, Locator};
use crate::network::{extract_domain, HttpClient};
use crate::resources::ResourceType;

/// API path prefix shared by every native endpoint.
const API_PREFIX: &str = "/api/rest/v2";

/// Asset type recorded when the server does not classify an asset.
const DEFAULT_ASSET_TYPE: &str = "other";

/// Dropped into the git resource next to the patch so a reader two years
/// later knows what the files are for.
const GIT_PATCH_README: &str = "\
This directory captures the source-control state of the experiment.

git_metadata.json records the repository origin, branch, and parent
commit. git_diff.patch holds the changes that were uncommitted when the
experiment ran. To reproduce the working tree, clone the repository,
check out the parent commit, and run:

    git apply git_diff.patch
";

/// Connection settings for one native deployment.
#[derive(Debug, Clone)]
pub struct NativeConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl NativeConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        NativeConfig {
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

/// REST adapter for the native tracking server.
pub struct NativeBackend {
    http: HttpClient,
    base_url: String,
    instance: String,
    /// Project details are requested once per project but consulted for
    /// every experiment page and every project-scoped resource.
    project_details: Cache<String, ProjectDto>,
}

impl NativeBackend {
    pub fn new(config: NativeConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let http = HttpClient::with_auth(config.timeout, "Authorization", &config.api_key)?;
        let instance = format!("native@{}", extract_domain(&base_url));
        let project_details = Cache::builder()
            .time_to_live(NetworkConfig::PROJECT_DETAIL_TTL)
            .max_capacity(NetworkConfig::PROJECT_DETAIL_CACHE_CAPACITY)
            .build();

        Ok(NativeBackend {
            http,
            base_url,
            instance,
            project_details,
        })
    }

    fn api_url(&self, path_and_query: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path_and_query)
    }

    // ========================================
    // Project Details
    // ========================================

    /// Look up one project's details, going through the TTL cache.
    async fn project_detail(&self, workspace: &str, project: &str) -> Result<ProjectDto> {
        let key = format!("{}/{}", workspace, project);
        if let Some(hit) = self.project_details.get(&key) {
            return Ok(hit);
        }

        let url = self.api_url(&format!(
            "/projects?workspaceName={}",
            urlencoding::encode(workspace)
        ));
        let response: ProjectsResponse = self.http.get_json(&url).await?;
        for dto in &response.projects {
            self.project_details
                .insert(format!("{}/{}", workspace, dto.project_name), dto.clone());
        }

        response
            .projects
            .into_iter()
            .find(|p| p.project_name == project)
            .ok_or_else(|| CaravelError::NotFound {
                what: format!("Project {}/{}", workspace, project),
            })
    }

    // ========================================
    // Enumeration
    // ========================================

    async fn list_projects(&self, workspace: &str) -> Result<Vec<RemoteEntity>> {
        let url = self.api_url(&format!(
            "/projects?workspaceName={}",
            urlencoding::encode(workspace)
        ));
        let response: ProjectsResponse = self.http.get_json(&url).await?;

        let parent = Locator::workspace(workspace);
        Ok(response
            .projects
            .into_iter()
            .map(|dto| {
                self.project_details
                    .insert(format!("{}/{}", workspace, dto.project_name), dto.clone());
                convert_project(dto, &parent)
            })
            .collect())
    }

    async fn list_experiments(&self, workspace: &str, project: &str) -> Result<Vec<RemoteEntity>> {
        let detail = self.project_detail(workspace, project).await?;
        let parent = Locator::project(workspace, project);
        let mut entities = Vec::new();
        let mut page = 1u32;

        loop {
            let url = self.api_url(&format!(
                "/experiments?projectId={}&page={}&pageSize={}",
                urlencoding::encode(&detail.project_id),
                page,
                NetworkConfig::PAGE_SIZE
            ));
            let response: ExperimentsResponse = self.http.get_json(&url).await?;
            let fetched = response.experiments.len();
            entities.extend(
                response
                    .experiments
                    .into_iter()
                    .map(|dto| convert_experiment(dto, &parent)),
            );
            if fetched < NetworkConfig::PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }

        debug!("Enumerated {} experiments in {}/{}", entities.len(), workspace, project);
        Ok(entities)
    }

    async fn list_artifacts(&self, workspace: &str) -> Result<Vec<RemoteEntity>> {
        let url = self.api_url(&format!(
            "/artifacts?workspace={}",
            urlencoding::encode(workspace)
        ));
        let response: ArtifactsResponse = self.http.get_json(&url).await?;
        let parent = Locator::Artifact {
            workspace: workspace.to_string(),
            name: None,
        };
        Ok(response
            .artifacts
            .into_iter()
            .map(|dto| RemoteEntity {
                kind: EntityKind::Artifact,
                id: dto.artifact_id,
                name: Some(dto.artifact_name),
                parent: parent.clone(),
                last_modified: None,
                child_count: dto.number_of_versions,
            })
            .collect())
    }

    async fn list_artifact_versions(
        &self,
        workspace: &str,
        name: &str,
    ) -> Result<Vec<RemoteEntity>> {
        let url = self.api_url(&format!(
            "/artifacts/versions?workspace={}&artifactName={}",
            urlencoding::encode(workspace),
            urlencoding::encode(name)
        ));
        let response: ArtifactVersionsResponse = self.http.get_json(&url).await?;
        let parent = Locator::Artifact {
            workspace: workspace.to_string(),
            name: Some(name.to_string()),
        };
        Ok(response
            .artifact_versions
            .into_iter()
            .map(|dto| RemoteEntity {
                kind: EntityKind::ArtifactVersion,
                id: dto.artifact_version_id,
                name: Some(dto.version),
                parent: parent.clone(),
                last_modified: dto.added,
                child_count: None,
            })
            .collect())
    }

    async fn list_models(&self, workspace: &str) -> Result<Vec<RemoteEntity>> {
        let url = self.api_url(&format!(
            "/registry-model?workspaceName={}",
            urlencoding::encode(workspace)
        ));
        let response: RegistryModelsResponse = self.http.get_json(&url).await?;
        let parent = Locator::ModelRegistryEntry {
            workspace: workspace.to_string(),
            name: None,
        };
        Ok(response
            .registry_models
            .into_iter()
            .map(|dto| RemoteEntity {
                kind: EntityKind::ModelRegistryEntry,
                id: dto.registry_model_id,
                name: Some(dto.model_name),
                parent: parent.clone(),
                last_modified: dto.last_updated,
                child_count: dto.number_of_versions,
            })
            .collect())
    }

    async fn list_model_versions(&self, workspace: &str, name: &str) -> Result<Vec<RemoteEntity>> {
        let versions = self.model_versions(workspace, name).await?;
        let parent = Locator::ModelRegistryEntry {
            workspace: workspace.to_string(),
            name: Some(name.to_string()),
        };
        Ok(versions
            .into_iter()
            .map(|dto| RemoteEntity {
                kind: EntityKind::ModelVersion,
                id: dto.registry_model_item_id,
                name: Some(dto.version),
                parent: parent.clone(),
                last_modified: dto.created_at,
                child_count: None,
            })
            .collect())
    }

    async fn model_versions(&self, workspace: &str, name: &str) -> Result<Vec<ModelVersionDto>> {
        let url = self.api_url(&format!(
            "/registry-model/details?workspaceName={}&modelName={}",
            urlencoding::encode(workspace),
            urlencoding::encode(name)
        ));
        let response: ModelDetailsResponse = self.http.get_json(&url).await?;
        Ok(response.versions)
    }

    // ========================================
    // Experiment Resource Fetches
    // ========================================

    /// Single-document resources: one GET, one file, absent when the
    /// experiment never logged that kind of data.
    async fn fetch_experiment_doc(
        &self,
        key: &str,
        resource: ResourceType,
    ) -> Result<Option<ResourcePayload>> {
        let Some(filename) = resource.primary_filename() else {
            return Ok(None);
        };
        let encoded = urlencoding::encode(key);
        let content: Option<Vec<u8>> = match resource {
            ResourceType::Metadata => {
                let url = self.api_url(&format!("/experiment/metadata?experimentKey={}", encoded));
                absent(self.http.get_json::<Value>(&url).await)?
                    .map(|doc| pretty_json(&doc))
                    .transpose()?
            }
            ResourceType::System => {
                let url = self.api_url(&format!(
                    "/experiment/system-details?experimentKey={}",
                    encoded
                ));
                absent(self.http.get_json::<Value>(&url).await)?
                    .map(|doc| pretty_json(&doc))
                    .transpose()?
            }
            ResourceType::Html => {
                let url = self.api_url(&format!("/experiment/html?experimentKey={}", encoded));
                absent(self.http.get_json::<HtmlResponse>(&url).await)?
                    .and_then(|r| r.html)
                    .map(String::into_bytes)
            }
            ResourceType::Code => {
                let url = self.api_url(&format!("/experiment/code?experimentKey={}", encoded));
                absent(self.http.get_json::<CodeResponse>(&url).await)?
                    .and_then(|r| r.code)
                    .map(String::into_bytes)
            }
            ResourceType::Output => {
                let url = self.api_url(&format!("/experiment/output?experimentKey={}", encoded));
                absent(self.http.get_json::<OutputResponse>(&url).await)?
                    .and_then(|r| r.output)
                    .map(String::into_bytes)
            }
            ResourceType::Graph => {
                let url = self.api_url(&format!("/experiment/graph?experimentKey={}", encoded));
                absent(self.http.get_json::<GraphResponse>(&url).await)?
                    .and_then(|r| r.graph)
                    .map(String::into_bytes)
            }
            ResourceType::Requirements => {
                let url = self.api_url(&format!(
                    "/experiment/installed-packages?experimentKey={}",
                    encoded
                ));
                absent(self.http.get_json::<PackagesResponse>(&url).await)?
                    .filter(|r| !r.packages.is_empty())
                    .map(|r| (r.packages.join("\n") + "\n").into_bytes())
            }
            _ => None,
        };

        Ok(content
            .filter(|bytes| !bytes.is_empty())
            .map(|bytes| ResourcePayload::single(filename, bytes)))
    }

    async fn fetch_metrics(
        &self,
        key: &str,
        filter: &TransferFilter,
    ) -> Result<Option<ResourcePayload>> {
        let url = self.api_url(&format!(
            "/experiment/metrics?experimentKey={}",
            urlencoding::encode(key)
        ));
        let Some(response) = absent(self.http.get_json::<MetricsResponse>(&url).await)? else {
            return Ok(None);
        };
        metrics_payload(response.metrics, filter)
    }

    async fn fetch_named_values(
        &self,
        key: &str,
        resource: ResourceType,
    ) -> Result<Option<ResourcePayload>> {
        let encoded = urlencoding::encode(key);
        let (url, filename, as_lines) = match resource {
            ResourceType::Others => (
                self.api_url(&format!("/experiment/log-other?experimentKey={}", encoded)),
                "others.jsonl",
                true,
            ),
            ResourceType::Parameters => (
                self.api_url(&format!("/experiment/parameters?experimentKey={}", encoded)),
                "parameters.json",
                false,
            ),
            _ => return Ok(None),
        };

        let Some(response) = absent(self.http.get_json::<NamedValuesResponse>(&url).await)? else {
            return Ok(None);
        };
        if response.values.is_empty() {
            return Ok(None);
        }

        let bytes = if as_lines {
            json_lines(&response.values)?
        } else {
            pretty_json(&response.values)?
        };
        Ok(Some(ResourcePayload::single(filename, bytes)))
    }

    async fn fetch_assets(
        &self,
        key: &str,
        filter: &TransferFilter,
    ) -> Result<Option<ResourcePayload>> {
        let encoded = urlencoding::encode(key);
        // A plain-literal type pattern narrows the listing server-side;
        // anything fancier is matched here after the full list arrives.
        let type_param = filter
            .asset_type_pattern()
            .filter(|p| is_plain_literal(p))
            .map(|p| urlencoding::encode(p).into_owned())
            .unwrap_or_else(|| "all".to_string());
        let url = self.api_url(&format!(
            "/experiment/asset/list?experimentKey={}&type={}",
            encoded, type_param
        ));

        let Some(listing) = absent(self.http.get_json::<AssetListResponse>(&url).await)? else {
            return Ok(None);
        };
        let selected = select_assets(listing.assets, filter);
        if selected.is_empty() {
            return Ok(None);
        }

        let mut payload = ResourcePayload {
            files: vec![ResourceFile::new(
                StoreConfig::ASSETS_METADATA_FILENAME,
                json_lines(&selected)?,
            )],
        };

        for asset in &selected {
            let url = self.api_url(&format!(
                "/experiment/asset/download?experimentKey={}&assetId={}",
                encoded,
                urlencoding::encode(&asset.asset_id)
            ));
            let bytes = self.http.get_bytes(&url).await?;
            let rel_path = format!("{}/{}", asset_type_of(asset), asset.file_name);
            if let Some(expected) = &asset.sha256 {
                verify_sha256(&bytes, expected, &rel_path)?;
            }
            let mut file = ResourceFile::new(rel_path, bytes);
            if let Some(sha) = &asset.sha256 {
                file = file.with_sha256(sha.clone());
            }
            payload.files.push(file);
        }

        Ok(Some(payload))
    }

    async fn fetch_git(&self, key: &str) -> Result<Option<ResourcePayload>> {
        let encoded = urlencoding::encode(key);
        let metadata_url =
            self.api_url(&format!("/experiment/git/metadata?experimentKey={}", encoded));
        let patch_url = self.api_url(&format!("/experiment/git/patch?experimentKey={}", encoded));

        let metadata = absent(self.http.get_json::<Value>(&metadata_url).await)?;
        let patch_archive = absent(self.http.get_bytes(&patch_url).await)?;

        if metadata.is_none() && patch_archive.is_none() {
            return Ok(None);
        }

        let mut payload = ResourcePayload::default();
        if let Some(doc) = metadata {
            payload.files.push(ResourceFile::new(
                StoreConfig::GIT_METADATA_FILENAME,
                pretty_json(&doc)?,
            ));
        }
        if let Some(archive) = patch_archive {
            // The wire format is a single-entry zip around the raw patch
            let (_, patch) = unzip_single(&archive)?;
            payload
                .files
                .push(ResourceFile::new(StoreConfig::GIT_PATCH_FILENAME, patch));
            payload.files.push(ResourceFile::new(
                StoreConfig::GIT_README_FILENAME,
                GIT_PATCH_README.as_bytes().to_vec(),
            ));
        }
        Ok(Some(payload))
    }

    // ========================================
    // Project Resource Fetches
    // ========================================

    async fn fetch_project_resource(
        &self,
        workspace: &str,
        project: &str,
        resource: ResourceType,
    ) -> Result<Option<ResourcePayload>> {
        match resource {
            ResourceType::ProjectMetadata => {
                let detail = self.project_detail(workspace, project).await?;
                Ok(Some(ResourcePayload::single(
                    "project_metadata.json",
                    pretty_json(&detail)?,
                )))
            }
            ResourceType::ProjectNotes => {
                let detail = self.project_detail(workspace, project).await?;
                let url = self.api_url(&format!(
                    "/project/notes?projectId={}",
                    urlencoding::encode(&detail.project_id)
                ));
                let notes = absent(self.http.get_json::<NotesResponse>(&url).await)?
                    .and_then(|r| r.notes)
                    .filter(|n| !n.is_empty());
                Ok(notes.map(|n| ResourcePayload::single("project_notes.md", n.into_bytes())))
            }
            _ => Ok(None),
        }
    }

    // ========================================
    // Artifact / Model Fetches
    // ========================================

    async fn fetch_artifact_files(
        &self,
        workspace: &str,
        name: &str,
        version: &str,
        filter: &TransferFilter,
    ) -> Result<Option<ResourcePayload>> {
        let url = self.api_url(&format!(
            "/artifacts/version/files?workspace={}&artifactName={}&version={}",
            urlencoding::encode(workspace),
            urlencoding::encode(name),
            urlencoding::encode(version)
        ));
        let listing: VersionFilesResponse = self.http.get_json(&url).await?;

        let mut payload = ResourcePayload::default();
        for file in listing.files {
            if !filter.matches_filename(&file.file_name) {
                continue;
            }
            let bytes = match (&file.link, &file.asset_id) {
                (Some(link), _) => self.http.get_bytes(link).await?,
                (None, Some(asset_id)) => {
                    let url = self.api_url(&format!(
                        "/artifacts/version/files/download?assetId={}",
                        urlencoding::encode(asset_id)
                    ));
                    self.http.get_bytes(&url).await?
                }
                (None, None) => {
                    warn!("Artifact file {} has no download source, skipping", file.file_name);
                    continue;
                }
            };
            if let Some(expected) = &file.sha256 {
                verify_sha256(&bytes, expected, &file.file_name)?;
            }
            let mut rf = ResourceFile::new(file.file_name.clone(), bytes);
            if let Some(sha) = &file.sha256 {
                rf = rf.with_sha256(sha.clone());
            }
            payload.files.push(rf);
        }

        Ok(if payload.is_empty() { None } else { Some(payload) })
    }

    async fn fetch_model_files(
        &self,
        workspace: &str,
        name: &str,
        version: &str,
        filter: &TransferFilter,
    ) -> Result<Option<ResourcePayload>> {
        let versions = self.model_versions(workspace, name).await?;
        let item = resolve_model_version(&versions, version).ok_or_else(|| {
            CaravelError::NotFound {
                what: format!("Model {}/{} version or stage {:?}", workspace, name, version),
            }
        })?;

        // sha256 declarations come from the listing; the bytes come as one
        // zip containing the whole version
        let files_url = self.api_url(&format!(
            "/registry-model/item/files?modelItemId={}",
            urlencoding::encode(&item.registry_model_item_id)
        ));
        let listing: VersionFilesResponse = self.http.get_json(&files_url).await?;

        let download_url = self.api_url(&format!(
            "/registry-model/item/download?modelItemId={}",
            urlencoding::encode(&item.registry_model_item_id)
        ));
        let archive = self.http.get_bytes(&download_url).await?;

        let mut payload = ResourcePayload::default();
        let mut zip = ZipArchive::new(Cursor::new(archive.as_ref()))
            .map_err(|e| archive_error("model version", e))?;
        for index in 0..zip.len() {
            let mut entry = zip
                .by_index(index)
                .map_err(|e| archive_error("model version", e))?;
            if entry.is_dir() {
                continue;
            }
            let rel_path = entry.name().to_string();
            if !filter.matches_filename(&rel_path) {
                continue;
            }
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| CaravelError::io_with_path(e, std::path::Path::new(&rel_path)))?;

            let declared = listing
                .files
                .iter()
                .find(|f| f.file_name == rel_path)
                .and_then(|f| f.sha256.clone());
            if let Some(expected) = &declared {
                verify_sha256(&bytes, expected, &rel_path)?;
            }
            let mut rf = ResourceFile::new(rel_path, bytes);
            if let Some(sha) = declared {
                rf = rf.with_sha256(sha);
            }
            payload.files.push(rf);
        }

        Ok(if payload.is_empty() { None } else { Some(payload) })
    }

    // ========================================
    // Push Operations
    // ========================================

    async fn push_experiment_resource(
        &self,
        key: &str,
        resource: ResourceType,
        payload: &ResourcePayload,
    ) -> Result<()> {
        let encoded = urlencoding::encode(key).into_owned();
        match resource {
            ResourceType::Metrics => {
                let samples = payload_json_lines(payload, "metrics")?;
                let url = self.api_url("/experiment/metrics/batch");
                self.http
                    .post_json(&url, &json!({ "experimentKey": key, "metrics": samples }))
                    .await?;
            }
            ResourceType::Others => {
                let values = payload_json_lines(payload, "others")?;
                let url = self.api_url("/experiment/log-other/batch");
                self.http
                    .post_json(&url, &json!({ "experimentKey": key, "values": values }))
                    .await?;
            }
            ResourceType::Parameters => {
                let values: Value = payload_json(payload, "parameters")?;
                let url = self.api_url("/experiment/parameters/batch");
                self.http
                    .post_json(&url, &json!({ "experimentKey": key, "parameters": values }))
                    .await?;
            }
            ResourceType::Metadata | ResourceType::System => {
                let doc: Value = payload_json(payload, resource.as_str())?;
                let path = if resource == ResourceType::Metadata {
                    "/experiment/metadata"
                } else {
                    "/experiment/system-details"
                };
                let url = self.api_url(path);
                self.http
                    .post_json(&url, &json!({ "experimentKey": key, "document": doc }))
                    .await?;
            }
            ResourceType::Html | ResourceType::Code | ResourceType::Output | ResourceType::Graph => {
                let text = payload_text(payload, resource.as_str())?;
                let (path, field) = match resource {
                    ResourceType::Html => ("/experiment/html", "html"),
                    ResourceType::Code => ("/experiment/code", "code"),
                    ResourceType::Output => ("/experiment/output", "output"),
                    _ => ("/experiment/graph", "graph"),
                };
                let url = self.api_url(path);
                self.http
                    .post_json(&url, &json!({ "experimentKey": key, field: text }))
                    .await?;
            }
            ResourceType::Requirements => {
                let text = payload_text(payload, "requirements")?;
                let packages: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
                let url = self.api_url("/experiment/installed-packages");
                self.http
                    .post_json(&url, &json!({ "experimentKey": key, "packages": packages }))
                    .await?;
            }
            ResourceType::Git => {
                for file in &payload.files {
                    let leaf = leaf_name(&file.rel_path);
                    if leaf == StoreConfig::GIT_METADATA_FILENAME {
                        let doc: Value = parse_json(&file.bytes, "git metadata")?;
                        let url = self.api_url("/experiment/git/metadata");
                        self.http
                            .post_json(&url, &json!({ "experimentKey": key, "document": doc }))
                            .await?;
                    } else if leaf == StoreConfig::GIT_PATCH_FILENAME {
                        let archive = zip_single(StoreConfig::GIT_PATCH_FILENAME, &file.bytes)?;
                        let url = self
                            .api_url(&format!("/experiment/git/patch?experimentKey={}", encoded));
                        self.http.post_bytes(&url, Bytes::from(archive)).await?;
                    }
                    // the README is local color, not wire data
                }
            }
            ResourceType::Assets => {
                for file in &payload.files {
                    if file.rel_path == StoreConfig::ASSETS_METADATA_FILENAME {
                        continue;
                    }
                    let (asset_type, file_name) = split_asset_path(&file.rel_path);
                    let url = self.api_url(&format!(
                        "/experiment/asset/upload?experimentKey={}&fileName={}&type={}",
                        encoded,
                        urlencoding::encode(file_name),
                        urlencoding::encode(asset_type)
                    ));
                    self.http.post_bytes(&url, file.bytes.clone()).await?;
                }
            }
            _ => {
                return Err(CaravelError::Unsupported {
                    backend: "native".to_string(),
                    operation: format!("pushing {} to an experiment", resource),
                })
            }
        }
        Ok(())
    }

    async fn push_project_resource(
        &self,
        workspace: &str,
        project: &str,
        resource: ResourceType,
        payload: &ResourcePayload,
    ) -> Result<()> {
        let detail = self.project_detail(workspace, project).await?;
        match resource {
            ResourceType::ProjectNotes => {
                let notes = payload_text(payload, "project notes")?;
                let url = self.api_url("/project/notes");
                self.http
                    .post_json(&url, &json!({ "projectId": detail.project_id, "notes": notes }))
                    .await?;
            }
            ResourceType::ProjectMetadata => {
                let doc: Value = payload_json(payload, "project metadata")?;
                let url = self.api_url("/projects/update");
                self.http
                    .post_json(
                        &url,
                        &json!({
                            "projectId": detail.project_id,
                            "projectDescription": doc.get("projectDescription"),
                            "isPublic": doc.get("isPublic"),
                        }),
                    )
                    .await?;
            }
            _ => {
                return Err(CaravelError::Unsupported {
                    backend: "native".to_string(),
                    operation: format!("pushing {} to a project", resource),
                })
            }
        }
        Ok(())
    }

}

#[async_trait]
impl Backend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn instance_id(&self) -> &str {
        &self.instance
    }

    async fn list_workspaces(&self) -> Result<Vec<RemoteEntity>> {
        let url = self.api_url("/workspaces");
        let response: WorkspacesResponse = self.http.get_json(&url).await?;
        Ok(response
            .workspace_names
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
            Locator::Project { workspace, project } => {
                self.list_experiments(workspace, project).await
            }
            Locator::Artifact { workspace, name: None } => self.list_artifacts(workspace).await,
            Locator::Artifact { workspace, name: Some(name) } => {
                self.list_artifact_versions(workspace, name).await
            }
            Locator::ModelRegistryEntry { workspace, name: None } => {
                self.list_models(workspace).await
            }
            Locator::ModelRegistryEntry { workspace, name: Some(name) } => {
                self.list_model_versions(workspace, name).await
            }
            Locator::Experiment { .. }
            | Locator::ArtifactVersion { .. }
            | Locator::ModelVersion { .. } => Ok(Vec::new()),
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
                ResourceType::Others | ResourceType::Parameters => {
                    self.fetch_named_values(experiment, resource).await
                }
                ResourceType::Assets => self.fetch_assets(experiment, filter).await,
                ResourceType::Git => self.fetch_git(experiment).await,
                ResourceType::ProjectNotes | ResourceType::ProjectMetadata => Ok(None),
                _ => self.fetch_experiment_doc(experiment, resource).await,
            },
            Locator::Project { workspace, project } => {
                self.fetch_project_resource(workspace, project, resource).await
            }
            Locator::ArtifactVersion {
                workspace,
                name,
                version,
            } => match resource {
                ResourceType::Assets => {
                    self.fetch_artifact_files(workspace, name, version, filter).await
                }
                _ => Ok(None),
            },
            Locator::ModelVersion {
                workspace,
                name,
                version,
            } => match resource {
                ResourceType::Assets => {
                    self.fetch_model_files(workspace, name, version, filter).await
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
        seed: &ProjectSeed,
    ) -> Result<()> {
        match self.project_detail(workspace, project).await {
            Ok(_) => return Ok(()),
            Err(CaravelError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let url = self.api_url("/projects");
        let body = CreateProjectRequest {
            workspace_name: workspace.to_string(),
            project_name: project.to_string(),
            project_description: seed.description.clone(),
            is_public: seed.public,
        };
        let created: CreatedProjectResponse = self.http.post_json_response(&url, &body).await?;
        debug!("Created project {}/{} ({})", workspace, project, created.project_id);
        self.project_details.invalidate(&format!("{}/{}", workspace, project));
        Ok(())
    }

    async fn push_entity(&self, dest: &Locator, source: &EntitySnapshot) -> Result<RemoteEntity> {
        let Locator::Project { workspace, project } = dest else {
            return Err(CaravelError::Unsupported {
                backend: "native".to_string(),
                operation: format!("creating an experiment under {}", dest),
            });
        };

        let url = self.api_url("/experiments");
        let body = CreateExperimentRequest {
            workspace_name: workspace.clone(),
            project_name: project.clone(),
            experiment_name: source.name.clone(),
            origin: Some(source.source_path.clone()),
        };
        let created: CreatedExperimentResponse = self.http.post_json_response(&url, &body).await?;
        debug!(
            "Created experiment {} in {}/{} from {}",
            created.experiment_key, workspace, project, source.source_path
        );

        Ok(RemoteEntity {
            kind: EntityKind::Experiment,
            id: created.experiment_key,
            name: source.name.clone(),
            parent: dest.clone(),
            last_modified: None,
            child_count: None,
        })
    }

    async fn push_resource(
        &self,
        dest: &RemoteEntity,
        resource: ResourceType,
        payload: &ResourcePayload,
    ) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }
        match dest.kind {
            EntityKind::Experiment => {
                self.push_experiment_resource(&dest.id, resource, payload).await
            }
            EntityKind::Project => {
                let workspace = dest.parent.workspace_name().to_string();
                self.push_project_resource(&workspace, dest.display_name(), resource, payload)
                    .await
            }
            _ => Err(CaravelError::Unsupported {
                backend: "native".to_string(),
                operation: format!("pushing resources to a {} entity", dest.kind),
            }),
        }
    }

    async fn link_entity(
        &self,
        source_experiment: &Locator,
        dest: &Locator,
    ) -> Result<RemoteEntity> {
        let Locator::Experiment { experiment, .. } = source_experiment else {
            return Err(CaravelError::Unsupported {
                backend: "native".to_string(),
                operation: format!("symlinking {}", source_experiment),
            });
        };
        let Locator::Project { workspace, project } = dest else {
            return Err(CaravelError::Unsupported {
                backend: "native".to_string(),
                operation: format!("symlinking into {}", dest),
            });
        };

        let detail = self.project_detail(workspace, project).await?;
        let url = self.api_url("/experiment/symlink");
        self.http
            .post_json(
                &url,
                &json!({ "experimentKey": experiment, "projectId": detail.project_id }),
            )
            .await?;

        Ok(RemoteEntity {
            kind: EntityKind::Experiment,
            id: experiment.clone(),
            name: None,
            parent: dest.clone(),
            last_modified: None,
            child_count: None,
        })
    }
}

// ========================================
// Conversions
// ========================================

fn convert_project(dto: ProjectDto, parent: &Locator) -> RemoteEntity {
    RemoteEntity {
        kind: EntityKind::Project,
        id: dto.project_id,
        name: Some(dto.project_name),
        parent: parent.clone(),
        last_modified: dto.last_updated,
        child_count: dto.number_of_experiments,
    }
}

fn convert_experiment(dto: ExperimentDto, parent: &Locator) -> RemoteEntity {
    let last_modified = dto
        .end_time_millis
        .or(dto.start_time_millis)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
    RemoteEntity {
        kind: EntityKind::Experiment,
        id: dto.experiment_key,
        name: dto.experiment_name,
        parent: parent.clone(),
        last_modified,
        child_count: None,
    }
}

/// Build the metrics jsonl payload, dropping excluded metric names.
fn metrics_payload(
    samples: Vec<MetricSampleDto>,
    filter: &TransferFilter,
) -> Result<Option<ResourcePayload>> {
    let kept: Vec<MetricSampleDto> = samples
        .into_iter()
        .filter(|s| filter.metric_allowed(&s.metric_name))
        .collect();
    if kept.is_empty() {
        return Ok(None);
    }
    Ok(Some(ResourcePayload::single("metrics.jsonl", json_lines(&kept)?)))
}

fn select_assets(assets: Vec<AssetDto>, filter: &TransferFilter) -> Vec<AssetDto> {
    assets
        .into_iter()
        .filter(|a| filter.matches_asset(asset_type_of(a), &a.file_name))
        .collect()
}

fn asset_type_of(asset: &AssetDto) -> &str {
    asset.asset_type.as_deref().unwrap_or(DEFAULT_ASSET_TYPE)
}

/// Stage-or-version lookup, case-insensitive on both axes.
fn resolve_model_version<'a>(
    versions: &'a [ModelVersionDto],
    requested: &str,
) -> Option<&'a ModelVersionDto> {
    versions.iter().find(|v| {
        v.version.eq_ignore_ascii_case(requested)
            || v.stages.iter().any(|s| s.eq_ignore_ascii_case(requested))
    })
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

fn first_file<'a>(payload: &'a ResourcePayload, what: &str) -> Result<&'a ResourceFile> {
    payload.files.first().ok_or_else(|| CaravelError::Store {
        message: format!("Empty {} payload", what),
    })
}

fn payload_text(payload: &ResourcePayload, what: &str) -> Result<String> {
    let file = first_file(payload, what)?;
    String::from_utf8(file.bytes.to_vec())
        .map_err(|_| CaravelError::Other(format!("{} payload is not valid UTF-8", what)))
}

fn payload_json(payload: &ResourcePayload, what: &str) -> Result<Value> {
    let file = first_file(payload, what)?;
    parse_json(&file.bytes, what)
}

fn payload_json_lines(payload: &ResourcePayload, what: &str) -> Result<Vec<Value>> {
    let text = payload_text(payload, what)?;
    let mut values = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        values.push(parse_json(line.as_bytes(), what)?);
    }
    Ok(values)
}

fn parse_json(bytes: &[u8], what: &str) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| CaravelError::Json {
        message: format!("Malformed {} payload: {}", what, e),
        source: Some(e),
    })
}

fn split_asset_path(rel_path: &str) -> (&str, &str) {
    match rel_path.split_once('/') {
        Some((asset_type, rest)) => (asset_type, leaf_name(rest)),
        None => (DEFAULT_ASSET_TYPE, rel_path),
    }
}

fn leaf_name(rel_path: &str) -> &str {
    rel_path.rsplit('/').next().unwrap_or(rel_path)
}

fn is_plain_literal(pattern: &str) -> bool {
    !pattern.is_empty()
        && pattern
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn verify_sha256(bytes: &[u8], expected: &str, what: &str) -> Result<()> {
    let actual = hex::encode(Sha256::digest(bytes));
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(CaravelError::HashMismatch {
            path: what.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

// ========================================
// Zip Helpers
// ========================================

fn zip_single(name: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut cursor);
        writer
            .start_file(name, SimpleFileOptions::default())
            .map_err(|e| archive_error(name, e))?;
        writer
            .write_all(data)
            .map_err(|e| CaravelError::io_with_path(e, std::path::Path::new(name)))?;
        writer.finish().map_err(|e| archive_error(name, e))?;
    }
    Ok(cursor.into_inner())
}

fn unzip_single(archive: &[u8]) -> Result<(String, Vec<u8>)> {
    let mut zip =
        ZipArchive::new(Cursor::new(archive)).map_err(|e| archive_error("git patch", e))?;
    if zip.is_empty() {
        return Err(CaravelError::Other("Git patch archive is empty".to_string()));
    }
    let mut entry = zip.by_index(0).map_err(|e| archive_error("git patch", e))?;
    let name = entry.name().to_string();
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut data)
        .map_err(|e| CaravelError::io_with_path(e, std::path::Path::new(&name)))?;
    Ok((name, data))
}

fn archive_error(what: &str, err: zip::result::ZipError) -> CaravelError {
    CaravelError::Other(format!("Archive error in {}: {}", what, err))
}

fn absent<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(CaravelError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

// ========================================
// Wire DTOs
// ========================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspacesResponse {
    workspace_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectsResponse {
    projects: Vec<ProjectDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDto {
    project_id: String,
    project_name: String,
    #[serde(default)]
    project_description: Option<String>,
    #[serde(default)]
    is_public: bool,
    #[serde(default)]
    number_of_experiments: Option<u64>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ExperimentsResponse {
    experiments: Vec<ExperimentDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExperimentDto {
    experiment_key: String,
    #[serde(default)]
    experiment_name: Option<String>,
    #[serde(default)]
    start_time_millis: Option<i64>,
    #[serde(default)]
    end_time_millis: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MetricsResponse {
    metrics: Vec<MetricSampleDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricSampleDto {
    metric_name: String,
    #[serde(flatten)]
    rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct NamedValuesResponse {
    values: Vec<NamedValueDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NamedValueDto {
    name: String,
    #[serde(flatten)]
    rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct HtmlResponse {
    #[serde(default)]
    html: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CodeResponse {
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputResponse {
    #[serde(default)]
    output: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphResponse {
    #[serde(default)]
    graph: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PackagesResponse {
    #[serde(default)]
    packages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NotesResponse {
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssetListResponse {
    assets: Vec<AssetDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetDto {
    asset_id: String,
    file_name: String,
    #[serde(default)]
    file_size: Option<u64>,
    #[serde(rename = "type", default)]
    asset_type: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtifactsResponse {
    artifacts: Vec<ArtifactDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactDto {
    artifact_id: String,
    artifact_name: String,
    #[serde(default)]
    number_of_versions: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactVersionsResponse {
    artifact_versions: Vec<ArtifactVersionDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactVersionDto {
    artifact_version_id: String,
    version: String,
    #[serde(default)]
    added: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct VersionFilesResponse {
    files: Vec<RemoteFileDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFileDto {
    file_name: String,
    #[serde(default)]
    asset_id: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryModelsResponse {
    registry_models: Vec<RegistryModelDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryModelDto {
    registry_model_id: String,
    model_name: String,
    #[serde(default)]
    number_of_versions: Option<u64>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ModelDetailsResponse {
    versions: Vec<ModelVersionDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelVersionDto {
    registry_model_item_id: String,
    version: String,
    #[serde(default)]
    stages: Vec<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectRequest {
    workspace_name: String,
    project_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_description: Option<String>,
    is_public: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedProjectResponse {
    project_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateExperimentRequest {
    workspace_name: String,
    project_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    experiment_name: Option<String>,
    /// Canonical source path, recorded for provenance.
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedExperimentResponse {
    experiment_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> NativeBackend {
        NativeBackend::new(NativeConfig::new("https://track.example.com/", "key-123")).unwrap()
    }

    #[test]
    fn test_instance_id_and_urls() {
        let backend = setup();
        assert_eq!(backend.instance_id(), "native@track.example.com");
        assert_eq!(
            backend.api_url("/workspaces"),
            "https://track.example.com/api/rest/v2/workspaces"
        );
    }

    #[test]
    fn test_convert_project() {
        let dto = ProjectDto {
            project_id: "p-42".to_string(),
            project_name: "vision".to_string(),
            project_description: Some("image models".to_string()),
            is_public: false,
            number_of_experiments: Some(17),
            last_updated: None,
        };
        let entity = convert_project(dto, &Locator::workspace("team"));
        assert_eq!(entity.kind, EntityKind::Project);
        assert_eq!(entity.id, "p-42");
        assert_eq!(entity.child_count, Some(17));
        assert_eq!(entity.locator(), Locator::project("team", "vision"));
    }

    #[test]
    fn test_convert_experiment_timestamps() {
        let dto = ExperimentDto {
            experiment_key: "abc123".to_string(),
            experiment_name: None,
            start_time_millis: Some(1_700_000_000_000),
            end_time_millis: None,
        };
        let entity = convert_experiment(dto, &Locator::project("team", "vision"));
        assert_eq!(entity.id, "abc123");
        assert!(entity.last_modified.is_some());
    }

    #[test]
    fn test_metrics_payload_respects_excludes() {
        let samples = vec![
            MetricSampleDto {
                metric_name: "loss".to_string(),
                rest: serde_json::Map::new(),
            },
            MetricSampleDto {
                metric_name: "sys.cpu".to_string(),
                rest: serde_json::Map::new(),
            },
        ];
        let filter = TransferFilter::default()
            .with_metric_excludes(&["^sys\\."])
            .unwrap();

        let payload = metrics_payload(samples, &filter).unwrap().unwrap();
        let text = String::from_utf8(payload.files[0].bytes.to_vec()).unwrap();
        assert!(text.contains("loss"));
        assert!(!text.contains("sys.cpu"));
    }

    #[test]
    fn test_metrics_payload_empty_after_filter() {
        let samples = vec![MetricSampleDto {
            metric_name: "sys.cpu".to_string(),
            rest: serde_json::Map::new(),
        }];
        let filter = TransferFilter::default()
            .with_metric_excludes(&["^sys\\."])
            .unwrap();
        assert!(metrics_payload(samples, &filter).unwrap().is_none());
    }

    #[test]
    fn test_select_assets() {
        let assets = vec![
            AssetDto {
                asset_id: "a1".to_string(),
                file_name: "plot.png".to_string(),
                file_size: Some(10),
                asset_type: Some("image".to_string()),
                sha256: None,
            },
            AssetDto {
                asset_id: "a2".to_string(),
                file_name: "dump.bin".to_string(),
                file_size: Some(99),
                asset_type: None,
                sha256: None,
            },
        ];
        let filter = TransferFilter::new(Some("^image$"), None).unwrap();
        let selected = select_assets(assets, &filter);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].asset_id, "a1");
    }

    #[test]
    fn test_resolve_model_version_by_stage() {
        let versions = vec![
            ModelVersionDto {
                registry_model_item_id: "m1".to_string(),
                version: "1.0.0".to_string(),
                stages: vec![],
                created_at: None,
            },
            ModelVersionDto {
                registry_model_item_id: "m2".to_string(),
                version: "2.0.0".to_string(),
                stages: vec!["Production".to_string()],
                created_at: None,
            },
        ];
        assert_eq!(
            resolve_model_version(&versions, "production").unwrap().registry_model_item_id,
            "m2"
        );
        assert_eq!(
            resolve_model_version(&versions, "1.0.0").unwrap().registry_model_item_id,
            "m1"
        );
        assert!(resolve_model_version(&versions, "3.0.0").is_none());
    }

    #[test]
    fn test_zip_round_trip() {
        let patch = b"diff --git a/train.py b/train.py\n";
        let archive = zip_single("git_diff.patch", patch).unwrap();
        let (name, data) = unzip_single(&archive).unwrap();
        assert_eq!(name, "git_diff.patch");
        assert_eq!(data, patch);
    }

    #[test]
    fn test_verify_sha256_mismatch() {
        let err = verify_sha256(b"abc", "00", "file.bin").unwrap_err();
        assert!(matches!(err, CaravelError::HashMismatch { .. }));

        let good = hex::encode(Sha256::digest(b"abc"));
        assert!(verify_sha256(b"abc", &good, "file.bin").is_ok());
    }

    #[test]
    fn test_split_asset_path() {
        assert_eq!(split_asset_path("image/plot.png"), ("image", "plot.png"));
        assert_eq!(split_asset_path("loose.txt"), (DEFAULT_ASSET_TYPE, "loose.txt"));
        assert_eq!(
            split_asset_path("image/sub/deep.png"),
            ("image", "deep.png")
        );
    }

    #[test]
    fn test_is_plain_literal() {
        assert!(is_plain_literal("image"));
        assert!(is_plain_literal("model-element"));
        assert!(!is_plain_literal("^image$"));
        assert!(!is_plain_literal(""));
    }

    #[test]
    fn test_payload_json_lines() {
        let payload = ResourcePayload::single(
            "metrics.jsonl",
            Bytes::from_static(b"{\"metricName\":\"loss\"}\n\n{\"metricName\":\"acc\"}\n"),
        );
        let values = payload_json_lines(&payload, "metrics").unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["metricName"], "loss");
    }
}
