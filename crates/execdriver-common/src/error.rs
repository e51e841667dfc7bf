//! Unified error type for the exec driver workspace.
//!
//! Every public operation returns [`DriverError`] to its caller; nothing
//! retries internally. The one degraded path (OOM notifications unsupported
//! by the kernel) is logged by the driver and never surfaces here.

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum DriverError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A construction option or configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The container is not currently managed by this driver.
    #[error("container {id} is not running")]
    NotRunning {
        /// Container identifier.
        id: String,
    },

    /// A container with the same ID is already managed by this driver.
    #[error("container {id} is already active")]
    AlreadyActive {
        /// Container identifier.
        id: String,
    },

    /// A process could not be started, resolved, or reaped.
    #[error("process error{}: {message}", .pid.map(|p| format!(" (pid {p})")).unwrap_or_default())]
    Process {
        /// PID of the process, when one was known.
        pid: Option<i32>,
        /// Description of the failure.
        message: String,
    },

    /// A system call failed.
    #[error("{call} failed: {source}")]
    Syscall {
        /// Name of the failing call.
        call: &'static str,
        /// Underlying errno.
        source: Errno,
    },

    /// The container primitive library rejected an operation.
    #[error("container {id}: {message}")]
    Container {
        /// Container identifier.
        id: String,
        /// Description reported by the library.
        message: String,
    },

    /// The checkpoint/restore engine failed. Surfaced verbatim.
    #[error("checkpoint/restore engine: {message}")]
    Engine {
        /// Message reported by the engine.
        message: String,
    },

    /// A kernel or platform feature is not available.
    #[error("{feature} unsupported: {reason}")]
    Unsupported {
        /// Name of the missing feature.
        feature: &'static str,
        /// Why the feature is unavailable.
        reason: String,
    },

    /// Serialization or deserialization of persisted metadata failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl DriverError {
    /// Builds an [`DriverError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`DriverError::Syscall`].
    pub const fn syscall(call: &'static str, source: Errno) -> Self {
        Self::Syscall { call, source }
    }

    /// Returns `true` when the error means "no such container or image".
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NotRunning { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DriverError>;
