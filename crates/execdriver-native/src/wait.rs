//! Exit-wait strategies, chosen once per container from its namespace set.

use execdriver_common::error::Result;
use execdriver_core::reaper;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

use crate::backend::{Container, ContainerProcess};
use crate::container::ContainerConfig;

/// How to wait for a container's init process to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitWaiter {
    /// The container has its own PID namespace: the library's wait is exact,
    /// and the namespace dies with its init.
    Namespaced,
    /// The container shares the host PID namespace. The library's wait would
    /// also block on stream copies, and descendants survive the init, so
    /// wait on the PID directly and then sweep the cgroup.
    HostPid,
}

impl ExitWaiter {
    pub(crate) const fn for_config(config: &ContainerConfig) -> Self {
        if config.namespaces.shares_host_pid() {
            Self::HostPid
        } else {
            Self::Namespaced
        }
    }

    /// Blocks until the init process exits and returns its wait status.
    pub(crate) fn wait(
        self,
        process: &mut dyn ContainerProcess,
        container: &dyn Container,
    ) -> Result<WaitStatus> {
        match self {
            Self::Namespaced => process.wait(),
            Self::HostPid => {
                let pid = process.pid()?;
                let status = reaper::wait(pid)?;
                kill_cgroup_processes(container);
                // Releases the library's handle; the status was consumed above.
                if let Err(e) = process.wait() {
                    tracing::debug!(id = %container.id(), pid, error = %e, "process handle released");
                }
                Ok(status)
            }
        }
    }
}

/// Kills and reaps every process left in the container's cgroup.
///
/// The group is frozen while listing so nothing forks in between, then
/// thawed so the kills can be delivered.
fn kill_cgroup_processes(container: &dyn Container) {
    let id = container.id();
    if let Err(e) = container.pause() {
        tracing::warn!(id = %id, error = %e, "failed to freeze cgroup");
    }
    let pids = container.processes().unwrap_or_else(|e| {
        tracing::warn!(id = %id, error = %e, "failed to list cgroup processes");
        Vec::new()
    });
    let killed: Vec<i32> = pids
        .into_iter()
        .filter(|&pid| match reaper::signal(pid, Signal::SIGKILL) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(id = %id, pid, error = %e, "failed to kill leftover process");
                false
            }
        })
        .collect();
    if let Err(e) = container.resume() {
        tracing::warn!(id = %id, error = %e, "failed to thaw cgroup");
    }
    for pid in killed {
        if let Err(e) = reaper::wait(pid) {
            tracing::warn!(id = %id, pid, error = %e, "failed to reap leftover process");
        }
    }
}
