//! Linux capability sets for container init processes.
//!
//! Containers start from [`DEFAULT_CAPABILITIES`]; the caller may add or
//! drop individual capabilities, or use `ALL` on either side.

use std::fmt;
use std::str::FromStr;

use execdriver_common::error::{DriverError, Result};
use serde::{Deserialize, Serialize};

/// Linux capability identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    /// Make arbitrary changes to file UIDs and GIDs.
    Chown,
    /// Bypass file read, write, and execute permission checks.
    DacOverride,
    /// Bypass file read and directory search permission checks.
    DacReadSearch,
    /// Bypass permission checks requiring the file owner's UID.
    Fowner,
    /// Keep set-user-ID bits on modification.
    Fsetid,
    /// Send signals to arbitrary processes.
    Kill,
    /// Manipulate process GIDs.
    Setgid,
    /// Manipulate process UIDs.
    Setuid,
    /// Transfer capabilities.
    Setpcap,
    /// Set immutable and append-only file flags.
    LinuxImmutable,
    /// Bind to privileged ports (< 1024).
    NetBindService,
    /// Make socket broadcasts.
    NetBroadcast,
    /// Perform network administration.
    NetAdmin,
    /// Use raw and packet sockets.
    NetRaw,
    /// Lock memory.
    IpcLock,
    /// Bypass System V IPC permission checks.
    IpcOwner,
    /// Load and unload kernel modules.
    SysModule,
    /// Perform I/O port operations.
    SysRawio,
    /// Use `chroot(2)`.
    SysChroot,
    /// Trace arbitrary processes.
    SysPtrace,
    /// Use `acct(2)`.
    SysPacct,
    /// Perform a range of system administration operations.
    SysAdmin,
    /// Reboot the host.
    SysBoot,
    /// Raise process nice values.
    SysNice,
    /// Override resource limits.
    SysResource,
    /// Set the system clock.
    SysTime,
    /// Configure tty devices.
    SysTtyConfig,
    /// Create special files.
    Mknod,
    /// Establish file leases.
    Lease,
    /// Write to the kernel audit log.
    AuditWrite,
    /// Configure kernel auditing.
    AuditControl,
    /// Set file capabilities.
    Setfcap,
    /// Override mandatory access control.
    MacOverride,
    /// Configure mandatory access control.
    MacAdmin,
    /// Use privileged `syslog(2)` operations.
    Syslog,
    /// Trigger system wake-ups.
    WakeAlarm,
    /// Block system suspend.
    BlockSuspend,
    /// Read the kernel audit log.
    AuditRead,
}

const NAMES: [(Capability, &str); 38] = [
    (Capability::Chown, "CHOWN"),
    (Capability::DacOverride, "DAC_OVERRIDE"),
    (Capability::DacReadSearch, "DAC_READ_SEARCH"),
    (Capability::Fowner, "FOWNER"),
    (Capability::Fsetid, "FSETID"),
    (Capability::Kill, "KILL"),
    (Capability::Setgid, "SETGID"),
    (Capability::Setuid, "SETUID"),
    (Capability::Setpcap, "SETPCAP"),
    (Capability::LinuxImmutable, "LINUX_IMMUTABLE"),
    (Capability::NetBindService, "NET_BIND_SERVICE"),
    (Capability::NetBroadcast, "NET_BROADCAST"),
    (Capability::NetAdmin, "NET_ADMIN"),
    (Capability::NetRaw, "NET_RAW"),
    (Capability::IpcLock, "IPC_LOCK"),
    (Capability::IpcOwner, "IPC_OWNER"),
    (Capability::SysModule, "SYS_MODULE"),
    (Capability::SysRawio, "SYS_RAWIO"),
    (Capability::SysChroot, "SYS_CHROOT"),
    (Capability::SysPtrace, "SYS_PTRACE"),
    (Capability::SysPacct, "SYS_PACCT"),
    (Capability::SysAdmin, "SYS_ADMIN"),
    (Capability::SysBoot, "SYS_BOOT"),
    (Capability::SysNice, "SYS_NICE"),
    (Capability::SysResource, "SYS_RESOURCE"),
    (Capability::SysTime, "SYS_TIME"),
    (Capability::SysTtyConfig, "SYS_TTY_CONFIG"),
    (Capability::Mknod, "MKNOD"),
    (Capability::Lease, "LEASE"),
    (Capability::AuditWrite, "AUDIT_WRITE"),
    (Capability::AuditControl, "AUDIT_CONTROL"),
    (Capability::Setfcap, "SETFCAP"),
    (Capability::MacOverride, "MAC_OVERRIDE"),
    (Capability::MacAdmin, "MAC_ADMIN"),
    (Capability::Syslog, "SYSLOG"),
    (Capability::WakeAlarm, "WAKE_ALARM"),
    (Capability::BlockSuspend, "BLOCK_SUSPEND"),
    (Capability::AuditRead, "AUDIT_READ"),
];

/// Capabilities granted to unprivileged containers.
pub const DEFAULT_CAPABILITIES: [Capability; 14] = [
    Capability::Chown,
    Capability::DacOverride,
    Capability::Fsetid,
    Capability::Fowner,
    Capability::Mknod,
    Capability::NetRaw,
    Capability::Setgid,
    Capability::Setuid,
    Capability::Setfcap,
    Capability::Setpcap,
    Capability::NetBindService,
    Capability::SysChroot,
    Capability::Kill,
    Capability::AuditWrite,
];

const ALL: &str = "ALL";

impl Capability {
    /// Every known capability.
    pub fn all() -> impl Iterator<Item = Self> {
        NAMES.iter().map(|(cap, _)| *cap)
    }

    /// Kernel name without the `CAP_` prefix.
    #[must_use]
    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find_map(|(cap, name)| (*cap == self).then_some(*name))
            .unwrap_or_default()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = DriverError;

    /// Case-insensitive, with or without the `CAP_` prefix.
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        let bare = upper.strip_prefix("CAP_").unwrap_or(&upper);
        NAMES
            .iter()
            .find_map(|(cap, name)| (*name == bare).then_some(*cap))
            .ok_or_else(|| DriverError::Config {
                message: format!("unknown capability: {s:?}"),
            })
    }
}

fn is_all(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case(ALL)
}

/// Applies `add` and `drop` lists to `basics`.
///
/// `ALL` in `add` starts from every capability; `ALL` in `drop` discards
/// `basics` so only `add` survives. Order of first appearance is kept.
///
/// # Errors
///
/// Returns [`DriverError::Config`] naming the first unknown capability.
pub fn tweak(basics: &[Capability], add: &[String], drop: &[String]) -> Result<Vec<Capability>> {
    let dropped = drop
        .iter()
        .filter(|name| !is_all(name))
        .map(|name| name.parse::<Capability>())
        .collect::<Result<Vec<_>>>()?;

    let mut caps = Vec::new();
    if !drop.iter().any(|name| is_all(name)) {
        let start: Vec<Capability> = if add.iter().any(|name| is_all(name)) {
            Capability::all().collect()
        } else {
            basics.to_vec()
        };
        caps.extend(start.into_iter().filter(|cap| !dropped.contains(cap)));
    }

    for name in add.iter().filter(|name| !is_all(name)) {
        let cap = name.parse::<Capability>()?;
        if !caps.contains(&cap) {
            caps.push(cap);
        }
    }
    Ok(caps)
}
