//! Persisted container metadata.
//!
//! Each container keeps two JSON files in its private state directory:
//! the configuration it was created from and its last-known runtime state.
//! Checkpoint images carry copies of both.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use execdriver_common::constants::{CONTAINER_FILE, METADATA_FILES, STATE_FILE};
use execdriver_common::error::{DriverError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::container::ContainerConfig;

/// Runtime facts about a started container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeState {
    /// Host PID of the init process.
    pub init_process_pid: i32,
    /// Start time of the init process as read from `/proc/<pid>/stat`.
    pub init_process_start_time: String,
    /// Cgroup path per subsystem.
    #[serde(default)]
    pub cgroup_paths: BTreeMap<String, PathBuf>,
    /// Namespace path per namespace type.
    #[serde(default)]
    pub namespace_paths: BTreeMap<String, PathBuf>,
}

/// Reads `container.json` from `dir`.
///
/// # Errors
///
/// Returns an error if the file is missing or malformed.
pub fn read_container_config(dir: &Path) -> Result<ContainerConfig> {
    read_json(&dir.join(CONTAINER_FILE))
}

/// Writes `container.json` into `dir`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_container_config(dir: &Path, config: &ContainerConfig) -> Result<()> {
    write_json(&dir.join(CONTAINER_FILE), config)
}

/// Reads `state.json` from `dir`.
///
/// # Errors
///
/// Returns an error if the file is missing or malformed.
pub fn read_runtime_state(dir: &Path) -> Result<RuntimeState> {
    read_json(&dir.join(STATE_FILE))
}

/// Writes `state.json` into `dir`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_runtime_state(dir: &Path, state: &RuntimeState) -> Result<()> {
    write_json(&dir.join(STATE_FILE), state)
}

/// Copies both metadata files from `src` into `dst`, overwriting.
///
/// # Errors
///
/// Returns an error on the first file that cannot be copied.
pub fn copy_metadata(src: &Path, dst: &Path) -> Result<()> {
    for name in METADATA_FILES {
        let from = src.join(name);
        let _ = std::fs::copy(&from, dst.join(name)).map_err(|e| DriverError::io(&from, e))?;
    }
    tracing::debug!(src = %src.display(), dst = %dst.display(), "metadata copied");
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| DriverError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

// Written to a sibling temp file first so readers never see a torn file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content).map_err(|e| DriverError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| DriverError::io(path, e))
}
