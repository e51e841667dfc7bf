//! Resource usage snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw counters collected from a container's cgroup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStats {
    /// CPU accounting.
    pub cpu: CpuStats,
    /// Memory accounting.
    pub memory: MemoryStats,
    /// Block I/O accounting.
    pub io: IoStats,
    /// Number of processes in the cgroup.
    pub pids: u64,
}

/// CPU usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStats {
    /// Total CPU time consumed, in nanoseconds.
    pub total_usage_ns: u64,
    /// Time spent in user mode, in nanoseconds.
    pub user_ns: u64,
    /// Time spent in kernel mode, in nanoseconds.
    pub system_ns: u64,
    /// Time throttled by the CFS quota, in nanoseconds.
    pub throttled_ns: u64,
}

/// Memory usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Current usage in bytes.
    pub usage: u64,
    /// Peak usage in bytes.
    pub max_usage: u64,
    /// Configured limit in bytes; `0` when none is set.
    pub limit: u64,
    /// Times the limit was hit.
    pub failcnt: u64,
}

/// Block I/O counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoStats {
    /// Bytes read.
    pub read_bytes: u64,
    /// Bytes written.
    pub write_bytes: u64,
}

/// A timestamped stats snapshot with the effective memory limit resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStats {
    /// Raw counters.
    pub stats: ContainerStats,
    /// Collection time.
    pub read: DateTime<Utc>,
    /// Configured memory limit, or host memory when none is configured.
    pub memory_limit: u64,
}

impl ResourceStats {
    /// Stamps `stats` with the current time, resolving an unset (zero)
    /// memory limit to `machine_memory`.
    #[must_use]
    pub fn new(stats: ContainerStats, configured_limit: u64, machine_memory: u64) -> Self {
        let memory_limit = if configured_limit == 0 {
            machine_memory
        } else {
            configured_limit
        };
        Self {
            stats,
            read: Utc::now(),
            memory_limit,
        }
    }
}
