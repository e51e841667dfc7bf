//! Table of containers currently managed by a driver instance.
//!
//! Membership is the single source of truth for "is this container
//! running under us". One mutex serializes every operation; it is held only
//! for map access, never across process waits or stream copies. The one
//! deliberate exception is [`Registry::with_entry`], which checkpointing
//! uses to keep Kill and Terminate out while the engine snapshots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use execdriver_common::error::{DriverError, Result};
use execdriver_common::types::ContainerId;

use crate::backend::Container;

/// A registry value.
#[derive(Debug, Clone)]
pub enum ActiveContainer {
    /// A container started by Run and tracked through its library handle.
    Native(Arc<dyn Container>),
    /// A container brought back by Restore. The init PID is only known once
    /// the engine reports the restored process live.
    Restored {
        /// Library handle of the container.
        container: Arc<dyn Container>,
        /// Host PID of the restored init process, set when live.
        pid: Arc<OnceLock<i32>>,
    },
}

impl ActiveContainer {
    /// The library handle.
    #[must_use]
    pub fn container(&self) -> &Arc<dyn Container> {
        match self {
            Self::Native(container) | Self::Restored { container, .. } => container,
        }
    }

    /// Host PID of the container's init process.
    ///
    /// A restored container has no init until the engine reports it live;
    /// its library state is never consulted, since a container that was
    /// created but not started records PID 0.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotRunning`] for a restore that is not live
    /// yet, or an error if the runtime state cannot be read.
    pub fn init_pid(&self) -> Result<i32> {
        match self {
            Self::Native(container) => Ok(container.state()?.init_process_pid),
            Self::Restored { container, pid } => {
                pid.get().copied().ok_or_else(|| DriverError::NotRunning {
                    id: container.id().to_string(),
                })
            }
        }
    }
}

/// Mutex-guarded map from container ID to its live entry.
#[derive(Debug)]
pub struct Registry {
    root: PathBuf,
    entries: Mutex<HashMap<ContainerId, ActiveContainer>>,
}

impl Registry {
    /// Creates an empty registry whose containers keep state under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Private state directory of `id`.
    #[must_use]
    pub fn state_dir(&self, id: &ContainerId) -> PathBuf {
        self.root.join(id)
    }

    /// Root under which state directories live.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Adds `entry` under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::AlreadyActive`] if `id` is already present.
    pub fn register(&self, id: &ContainerId, entry: ActiveContainer) -> Result<()> {
        let mut entries = self.lock();
        if entries.contains_key(id) {
            return Err(DriverError::AlreadyActive { id: id.to_string() });
        }
        let _ = entries.insert(id.clone(), entry);
        tracing::debug!(id = %id, "registered");
        Ok(())
    }

    /// Registers a container the caller has just created.
    ///
    /// If `id` was registered in the meantime the new container is
    /// destroyed, so a lost race leaves nothing behind.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::AlreadyActive`] if `id` is already present.
    pub fn adopt(&self, id: &ContainerId, entry: ActiveContainer) -> Result<()> {
        let container = Arc::clone(entry.container());
        self.register(id, entry).inspect_err(|_| {
            if let Err(e) = container.destroy() {
                tracing::warn!(id = %id, error = %e, "failed to destroy duplicate container");
            }
        })
    }

    /// Returns the entry for `id`, if any.
    #[must_use]
    pub fn get(&self, id: &ContainerId) -> Option<ActiveContainer> {
        self.lock().get(id).cloned()
    }

    /// Returns the entry for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if `id` is not registered.
    pub fn lookup(&self, id: &ContainerId) -> Result<ActiveContainer> {
        self.get(id).ok_or_else(|| not_found(id))
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &ContainerId) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of registered containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no container is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs `f` on the entry for `id` with the registry locked throughout.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if `id` is not registered, or the
    /// error returned by `f`.
    pub fn with_entry<R>(
        &self,
        id: &ContainerId,
        f: impl FnOnce(&ActiveContainer) -> Result<R>,
    ) -> Result<R> {
        let entries = self.lock();
        let entry = entries.get(id).ok_or_else(|| not_found(id))?;
        f(entry)
    }

    /// Removes `id` and deletes its private state directory.
    ///
    /// A missing entry or directory is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory exists but cannot be removed.
    pub fn unregister(&self, id: &ContainerId) -> Result<()> {
        let removed = self.lock().remove(id).is_some();
        tracing::debug!(id = %id, removed, "unregistered");
        remove_state_dir(&self.state_dir(id))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ContainerId, ActiveContainer>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Recursively removes `dir`, treating "not found" as success.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be removed.
pub fn remove_state_dir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(DriverError::io(dir, e)),
        _ => Ok(()),
    }
}

fn not_found(id: &ContainerId) -> DriverError {
    DriverError::NotFound {
        kind: "active container",
        id: id.to_string(),
    }
}
