//! Translation of a [`Command`] into a [`ContainerConfig`].

use execdriver_common::config::CgroupDriver;
use execdriver_common::error::{DriverError, Result};
use execdriver_core::capability::{self, Capability, DEFAULT_CAPABILITIES};
use execdriver_core::namespace::NamespaceConfig;

use crate::command::Command;
use crate::container::{CgroupConfig, ContainerConfig};

/// Parent cgroup used when the command names none.
pub const DEFAULT_CGROUP_PARENT: &str = "docker";

/// Builds the declarative container configuration for `command`.
///
/// # Errors
///
/// Returns [`DriverError::Config`] for unknown capability names or
/// inconsistent memory limits.
pub fn container_config(command: &Command, manager: CgroupDriver) -> Result<ContainerConfig> {
    let namespaces = NamespaceConfig {
        pid: command.pid_mode.is_private(),
        mount: true,
        network: command.network_mode.is_private(),
        user: !command.uid_mappings.is_empty(),
        ipc: command.ipc_mode.is_private(),
        uts: command.uts_mode.is_private(),
    };

    let capabilities = if command.privileged {
        Capability::all().collect()
    } else {
        capability::tweak(&DEFAULT_CAPABILITIES, &command.cap_add, &command.cap_drop)?
    };

    Ok(ContainerConfig {
        rootfs: command.rootfs.clone(),
        readonly_rootfs: command.readonly_rootfs,
        hostname: if namespaces.uts {
            command.hostname.clone()
        } else {
            String::new()
        },
        namespaces,
        cgroups: cgroup_config(command, manager)?,
        capabilities,
        uid_mappings: command.uid_mappings.clone(),
        gid_mappings: command.gid_mappings.clone(),
    })
}

fn cgroup_config(command: &Command, manager: CgroupDriver) -> Result<CgroupConfig> {
    let res = &command.resources;
    if res.memory > 0
        && res.memory_swap > 0
        && u64::try_from(res.memory_swap).is_ok_and(|swap| swap < res.memory)
    {
        return Err(DriverError::Config {
            message: format!(
                "memory+swap limit {} must not be smaller than memory limit {}",
                res.memory_swap, res.memory
            ),
        });
    }

    let parent = if command.cgroup_parent.is_empty() {
        DEFAULT_CGROUP_PARENT.to_owned()
    } else {
        command.cgroup_parent.clone()
    };

    Ok(CgroupConfig {
        name: command.id.to_string(),
        parent,
        manager,
        memory: res.memory,
        memory_reservation: res.memory_reservation,
        memory_swap: res.memory_swap,
        cpu_shares: res.cpu_shares,
        cpuset_cpus: res.cpuset_cpus.clone(),
        blkio_weight: res.blkio_weight,
    })
}
