//! Namespace sets requested from the container primitive library.

use serde::{Deserialize, Serialize};

/// Configuration for which namespaces a container gets privately.
///
/// A `false` field means the container shares the host's namespace of
/// that kind.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Isolate PID namespace.
    pub pid: bool,
    /// Isolate mount namespace.
    pub mount: bool,
    /// Isolate network namespace.
    pub network: bool,
    /// Isolate user namespace.
    pub user: bool,
    /// Isolate IPC namespace.
    pub ipc: bool,
    /// Isolate UTS (hostname) namespace.
    pub uts: bool,
}

impl Default for NamespaceConfig {
    /// Everything private except the user namespace, which needs id mappings.
    fn default() -> Self {
        Self {
            pid: true,
            mount: true,
            network: true,
            user: false,
            ipc: true,
            uts: true,
        }
    }
}

impl NamespaceConfig {
    /// Whether processes of this container live in the host PID namespace.
    #[must_use]
    pub const fn shares_host_pid(&self) -> bool {
        !self.pid
    }
}
