//! Declarative container configuration handed to the container primitive library.
//!
//! This is what gets persisted as `container.json` and what a checkpoint
//! image carries so a restore can recreate the same layout.

use std::path::PathBuf;

use execdriver_common::config::CgroupDriver;
use execdriver_common::error::{DriverError, Result};
use execdriver_core::capability::Capability;
use execdriver_core::namespace::NamespaceConfig;
use serde::{Deserialize, Serialize};

/// Full description of an isolated environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Root filesystem of the container.
    pub rootfs: PathBuf,
    /// Whether the root filesystem is mounted read-only.
    pub readonly_rootfs: bool,
    /// Hostname inside a private UTS namespace; empty when sharing the host's.
    pub hostname: String,
    /// Namespaces the container gets privately.
    pub namespaces: NamespaceConfig,
    /// Resource-control group settings.
    pub cgroups: CgroupConfig,
    /// Capabilities granted to the init process.
    pub capabilities: Vec<Capability>,
    /// UID mappings for a private user namespace.
    #[serde(default)]
    pub uid_mappings: Vec<IdMap>,
    /// GID mappings for a private user namespace.
    #[serde(default)]
    pub gid_mappings: Vec<IdMap>,
}

/// Resource limits enforced through the container's cgroup.
///
/// Zero means "not set" for every limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgroupConfig {
    /// Cgroup name, the container ID.
    pub name: String,
    /// Parent cgroup.
    pub parent: String,
    /// Cgroup manager the limits are applied through.
    #[serde(default)]
    pub manager: CgroupDriver,
    /// Hard memory limit in bytes.
    pub memory: u64,
    /// Soft memory limit in bytes.
    pub memory_reservation: u64,
    /// Memory plus swap limit in bytes; `-1` for unlimited swap.
    pub memory_swap: i64,
    /// Relative CPU weight.
    pub cpu_shares: u64,
    /// CPUs the container may run on, in cpuset list syntax.
    pub cpuset_cpus: String,
    /// Relative block I/O weight.
    pub blkio_weight: u16,
}

/// One contiguous id range mapped into a user namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMap {
    /// First id inside the container.
    pub container_id: u32,
    /// First id on the host.
    pub host_id: u32,
    /// Number of ids mapped.
    pub size: u32,
}

impl ContainerConfig {
    /// Returns the host UID that container root maps to.
    ///
    /// Without a user namespace this is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if a user namespace is configured but root is not mapped.
    pub fn host_uid(&self) -> Result<u32> {
        if !self.namespaces.user {
            return Ok(0);
        }
        self.uid_mappings
            .iter()
            .find(|m| m.container_id == 0)
            .map(|m| m.host_id)
            .ok_or_else(|| DriverError::Config {
                message: "user namespaces enabled, but no root user mapping found".into(),
            })
    }
}
