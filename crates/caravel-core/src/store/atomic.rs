//! Atomic file writes for the local store.
//!
//! Both manifest JSON and resource payloads are staged to a temporary
//! name in the target directory, fsynced, then renamed into place, so a
//! reader never observes a partially written file. Payload temp files use
//! the `.part` suffix; interrupted transfers leave only `.part` litter,
//! never a truncated final file.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::thread;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{CaravelError, Result};

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut file = File::open(path).map_err(|e| CaravelError::io_with_path(e, path))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| CaravelError::io_with_path(e, path))?;

    let data: T = serde_json::from_str(&contents).map_err(|e| CaravelError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Write data to a JSON file atomically.
///
/// Serializes to a temp file named with a PID+TID suffix, validates the
/// JSON by re-parsing, fsyncs, then renames onto the target.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    ensure_parent(path)?;

    let pid = process::id();
    let tid = thread_id();
    let temp_path = path.with_extension(format!("json.{}.{}.tmp", pid, tid));

    let serialized = serde_json::to_string_pretty(data).map_err(|e| CaravelError::Json {
        message: format!("Failed to serialize data: {}", e),
        source: Some(e),
    })?;

    // Validate by re-parsing before anything touches the target path
    serde_json::from_str::<serde_json::Value>(&serialized).map_err(|e| CaravelError::Json {
        message: format!("JSON validation failed: {}", e),
        source: Some(e),
    })?;

    write_staged(&temp_path, serialized.as_bytes())?;
    rename_into_place(&temp_path, path)?;

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

/// Write a raw payload atomically via a `.part` staging file.
pub fn atomic_write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    let temp_path = part_path(path);
    write_staged(&temp_path, data)?;
    rename_into_place(&temp_path, path)?;
    Ok(())
}

/// The staging name a payload occupies until its final rename.
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(StoreConfig::TEMP_SUFFIX);
    PathBuf::from(name)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| CaravelError::io_with_path(e, parent))?;
        }
    }
    Ok(())
}

fn write_staged(temp_path: &Path, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(temp_path)
        .map_err(|e| CaravelError::io_with_path(e, temp_path))?;

    file.write_all(data)
        .map_err(|e| CaravelError::io_with_path(e, temp_path))?;
    file.flush()
        .map_err(|e| CaravelError::io_with_path(e, temp_path))?;
    sync_file(&file, temp_path)?;
    Ok(())
}

fn rename_into_place(temp_path: &Path, path: &Path) -> Result<()> {
    fs::rename(temp_path, path).map_err(|e| CaravelError::Io {
        message: format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        ),
        path: Some(path.to_path_buf()),
        source: Some(e),
    })
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn sync_file(file: &File, _path: &Path) -> Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: fsync on an fd we hold open; no pointers cross the boundary.
    unsafe {
        libc::fsync(file.as_raw_fd());
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_file(file: &File, path: &Path) -> Result<()> {
    file.sync_all()
        .map_err(|e| CaravelError::io_with_path(e, path))
}

/// Get a unique thread identifier.
fn thread_id() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let id = thread::current().id();
    let mut hasher = DefaultHasher::new();
    format!("{:?}", id).hash(&mut hasher);
    hasher.finish()
}
