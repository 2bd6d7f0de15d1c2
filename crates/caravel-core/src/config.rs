//! Centralized configuration for the Caravel engine.
//!
//! Compile-time constants live here; runtime knobs (worker counts, retry
//! policies, layout modes) are plain option structs passed into the
//! pipelines explicitly, never global state.

use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const DOWNLOAD_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
    pub const MAX_RETRIES: u32 = 3;
    pub const USER_AGENT: &'static str = concat!("caravel/", env!("CARGO_PKG_VERSION"));
    pub const PAGE_SIZE: u32 = 100;
    pub const PROJECT_DETAIL_TTL: Duration = Duration::from_secs(300);
    pub const PROJECT_DETAIL_CACHE_CAPACITY: u64 = 256;
}

/// Local store layout configuration.
pub struct StoreConfig;

impl StoreConfig {
    /// Files are staged under this suffix until the final rename.
    pub const TEMP_SUFFIX: &'static str = ".part";
    pub const MANIFEST_FILENAME: &'static str = "manifest.json";
    pub const STATE_DIR_NAME: &'static str = ".caravel";
    pub const SYNC_STATE_FILENAME: &'static str = "sync_state.json";
    pub const ASSETS_METADATA_FILENAME: &'static str = "assets_metadata.jsonl";
    pub const GIT_PATCH_FILENAME: &'static str = "git_diff.patch";
    pub const GIT_METADATA_FILENAME: &'static str = "git_metadata.json";
    pub const GIT_README_FILENAME: &'static str = "README.md";
}

/// Engine-wide scheduling and sampling parameters.
pub struct EngineConfig;

impl EngineConfig {
    pub const DEFAULT_WORKERS: usize = 4;
    /// Callers are expected to confirm before pulling at least this many
    /// entities; `estimate` exists so they can ask first.
    pub const CONFIRM_THRESHOLD: u64 = 2;
    /// External vendors with unbounded metric histories are sampled down
    /// to this many points per metric.
    pub const MAX_METRIC_SAMPLES: u32 = 15_000;
}
