//! Signal delivery, reaping, and exit-code translation.

use std::sync::OnceLock;

use execdriver_common::error::{DriverError, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

static SUBREAPER: OnceLock<std::result::Result<(), Errno>> = OnceLock::new();

/// Declares this process the reaper of orphaned descendants.
///
/// The setting is process-wide and applied at most once; later calls
/// return the outcome of the first.
///
/// # Errors
///
/// Returns an error if `prctl(PR_SET_CHILD_SUBREAPER)` failed.
pub fn become_subreaper() -> Result<()> {
    let outcome = SUBREAPER.get_or_init(|| {
        let outcome = nix::sys::prctl::set_child_subreaper(true);
        if outcome.is_ok() {
            tracing::info!("registered as child subreaper");
        }
        outcome
    });
    (*outcome).map_err(|e| DriverError::syscall("prctl(PR_SET_CHILD_SUBREAPER)", e))
}

/// Sends `signal` to the single process `pid`.
///
/// Non-positive PIDs address process groups in `kill(2)` and are rejected.
///
/// # Errors
///
/// Returns [`DriverError::Process`] for a non-positive PID, or an error if
/// the process does not exist or cannot be signaled.
pub fn signal(pid: i32, signal: Signal) -> Result<()> {
    if pid <= 0 {
        return Err(DriverError::Process {
            pid: Some(pid),
            message: format!("refusing to send {signal} to a process group"),
        });
    }
    kill(Pid::from_raw(pid), signal).map_err(|e| DriverError::syscall("kill", e))
}

/// Blocks until `pid` terminates and reaps it, retrying on `EINTR`.
///
/// # Errors
///
/// Returns an error if `pid` is not a child (or adopted orphan) of this process.
pub fn wait(pid: i32) -> Result<WaitStatus> {
    loop {
        match waitpid(Pid::from_raw(pid), None) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                tracing::debug!(pid, ?status, "reaped");
                return Ok(status);
            }
            Err(Errno::EINTR) | Ok(_) => {}
            Err(e) => return Err(DriverError::syscall("waitpid", e)),
        }
    }
}

/// Translates a wait status into a portable exit code.
///
/// Normal exits keep their code, signal deaths become `128 + signal`,
/// anything else is `-1`.
#[must_use]
pub fn exit_code(status: &WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => *code,
        WaitStatus::Signaled(_, signal, _) => 128 + *signal as i32,
        _ => -1,
    }
}
