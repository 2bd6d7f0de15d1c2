//! Watermark ledger for incrementally synced backends.
//!
//! Backends that can answer "what changed since marker X" (see
//! [`Backend::resources_changed_since`](super::Backend)) get their
//! markers persisted here, keyed by backend instance and canonical
//! entity path. The ledger lives inside the store's state directory so
//! it travels with the data it describes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{CaravelError, Result};
use crate::store::{atomic_read_json, atomic_write_json};

const LEDGER_SCHEMA_VERSION: u32 = 1;

/// A vendor-opaque progress marker for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncWatermark {
    /// Opaque cursor the backend hands back, compared only by the backend.
    pub marker: String,
    pub synced_at: DateTime<Utc>,
}

impl SyncWatermark {
    pub fn new(marker: impl Into<String>) -> Self {
        SyncWatermark {
            marker: marker.into(),
            synced_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerFile {
    schema_version: u32,
    /// backend instance id -> canonical entity path -> watermark
    #[serde(default)]
    backends: BTreeMap<String, BTreeMap<String, SyncWatermark>>,
}

/// Persistent map of sync watermarks, one file per store root.
pub struct SyncLedger {
    path: PathBuf,
    state: Mutex<LedgerFile>,
}

impl SyncLedger {
    /// Open the ledger inside `state_dir`, creating an empty one if none
    /// exists yet.
    pub fn open(state_dir: &Path) -> Result<SyncLedger> {
        fs::create_dir_all(state_dir).map_err(|e| CaravelError::io_with_path(e, state_dir))?;
        let path = state_dir.join(StoreConfig::SYNC_STATE_FILENAME);
        let state = atomic_read_json::<LedgerFile>(&path)?.unwrap_or(LedgerFile {
            schema_version: LEDGER_SCHEMA_VERSION,
            backends: BTreeMap::new(),
        });
        Ok(SyncLedger {
            path,
            state: Mutex::new(state),
        })
    }

    /// Last recorded watermark for an entity, if any.
    pub fn watermark(&self, backend_instance: &str, entity_path: &str) -> Option<SyncWatermark> {
        let state = self.state.lock().ok()?;
        state
            .backends
            .get(backend_instance)?
            .get(entity_path)
            .cloned()
    }

    /// Record a new watermark and persist the ledger.
    pub fn advance(
        &self,
        backend_instance: &str,
        entity_path: &str,
        marker: impl Into<String>,
    ) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| CaravelError::Store {
            message: "Sync ledger poisoned by a panicked writer".to_string(),
        })?;
        state
            .backends
            .entry(backend_instance.to_string())
            .or_default()
            .insert(entity_path.to_string(), SyncWatermark::new(marker));
        atomic_write_json(&self.path, &*state)?;
        debug!(
            "Advanced sync watermark for {} on {}",
            entity_path, backend_instance
        );
        Ok(())
    }

    /// Drop the watermark for one entity, forcing a full fetch next time.
    pub fn forget(&self, backend_instance: &str, entity_path: &str) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| CaravelError::Store {
            message: "Sync ledger poisoned by a panicked writer".to_string(),
        })?;
        if let Some(entities) = state.backends.get_mut(backend_instance) {
            if entities.remove(entity_path).is_some() {
                atomic_write_json(&self.path, &*state)?;
            }
        }
        Ok(())
    }

    /// Number of tracked entities across all backends.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.backends.values().map(|m| m.len()).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
