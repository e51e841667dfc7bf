//! Execution requests submitted to the driver.

use std::path::PathBuf;

use execdriver_common::types::ContainerId;
use serde::{Deserialize, Serialize};

use crate::container::IdMap;

/// A request to run one command in an isolated environment.
///
/// Immutable once submitted to [`crate::Driver::run`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Command {
    /// Unique, caller-assigned container ID.
    pub id: ContainerId,
    /// Root filesystem prepared by the caller.
    pub rootfs: PathBuf,
    /// Mount the root filesystem read-only.
    pub readonly_rootfs: bool,
    /// Hostname for a private UTS namespace.
    pub hostname: String,
    /// Working directory of the process inside the container.
    pub working_dir: String,
    /// What to execute.
    pub process_config: ProcessConfig,
    /// Cgroup limits.
    pub resources: Resources,
    /// PID namespace mode.
    pub pid_mode: NamespaceMode,
    /// IPC namespace mode.
    pub ipc_mode: NamespaceMode,
    /// UTS namespace mode.
    pub uts_mode: NamespaceMode,
    /// Network namespace mode.
    pub network_mode: NamespaceMode,
    /// Grant every capability.
    pub privileged: bool,
    /// Capabilities added to the default set.
    pub cap_add: Vec<String>,
    /// Capabilities removed from the default set.
    pub cap_drop: Vec<String>,
    /// Parent cgroup; empty selects the default.
    pub cgroup_parent: String,
    /// UID remapping; non-empty enables a user namespace.
    pub uid_mappings: Vec<IdMap>,
    /// GID remapping.
    pub gid_mappings: Vec<IdMap>,
}

/// The process to start as the container's init.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Program to execute.
    pub entrypoint: String,
    /// Arguments following the entrypoint.
    pub arguments: Vec<String>,
    /// Environment as `KEY=value` strings.
    pub env: Vec<String>,
    /// User (name or `uid[:gid]`) to run as.
    pub user: String,
    /// Allocate a pseudo-terminal.
    pub tty: bool,
}

impl ProcessConfig {
    /// `entrypoint` followed by `arguments`.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        std::iter::once(self.entrypoint.clone())
            .chain(self.arguments.iter().cloned())
            .collect()
    }
}

/// Cgroup limits requested for a container. Zero means unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Hard memory limit in bytes.
    pub memory: u64,
    /// Soft memory limit in bytes.
    pub memory_reservation: u64,
    /// Memory plus swap in bytes; `-1` for unlimited swap.
    pub memory_swap: i64,
    /// Relative CPU weight.
    pub cpu_shares: u64,
    /// Cpuset list.
    pub cpuset_cpus: String,
    /// Relative block I/O weight (10-1000).
    pub blkio_weight: u16,
}

/// Whether a namespace is private to the container or shared with the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceMode {
    /// A fresh namespace for the container.
    #[default]
    Private,
    /// The host's namespace.
    Host,
}

impl NamespaceMode {
    /// Whether the container gets its own namespace.
    #[must_use]
    pub const fn is_private(self) -> bool {
        matches!(self, Self::Private)
    }
}
