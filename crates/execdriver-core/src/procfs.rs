//! Readers for the few `/proc` facts the driver needs.

use std::path::PathBuf;

use execdriver_common::constants::MEMINFO_PATH;
use execdriver_common::error::{DriverError, Result};

/// Index of `starttime` among the fields following `(comm)` in `/proc/<pid>/stat`.
const STARTTIME_FIELD: usize = 19;

/// Returns the start time of `pid`, in clock ticks since boot, as recorded
/// by the kernel.
///
/// The value is kept as the raw string: it is only ever compared for
/// equality to tell a live process from a recycled PID.
///
/// # Errors
///
/// Returns an error if the process does not exist or its stat line is malformed.
pub fn process_start_time(pid: i32) -> Result<String> {
    let path = PathBuf::from(format!("/proc/{pid}/stat"));
    let stat = std::fs::read_to_string(&path).map_err(|e| DriverError::io(&path, e))?;
    parse_start_time(&stat)
        .map(str::to_owned)
        .ok_or_else(|| DriverError::Process {
            pid: Some(pid),
            message: format!("malformed {}", path.display()),
        })
}

/// Returns the one-letter scheduler state of `pid` (`R`, `S`, `Z`, ...),
/// or `None` if the process is gone.
#[must_use]
pub fn process_state(pid: i32) -> Option<char> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    after_comm(&stat)?.split_whitespace().next()?.chars().next()
}

/// Returns the host's total memory in bytes.
///
/// # Errors
///
/// Returns an error if `/proc/meminfo` cannot be read or lacks `MemTotal`.
pub fn total_memory() -> Result<u64> {
    let meminfo =
        std::fs::read_to_string(MEMINFO_PATH).map_err(|e| DriverError::io(MEMINFO_PATH, e))?;
    parse_mem_total(&meminfo).ok_or_else(|| DriverError::Config {
        message: format!("no MemTotal in {MEMINFO_PATH}"),
    })
}

// The command name may itself contain spaces or parentheses; fields start
// after the last ')'.
fn after_comm(stat: &str) -> Option<&str> {
    stat.rfind(')').map(|i| &stat[i + 1..])
}

fn parse_start_time(stat: &str) -> Option<&str> {
    after_comm(stat)?.split_whitespace().nth(STARTTIME_FIELD)
}

fn parse_mem_total(meminfo: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        let mut parts = rest.split_whitespace();
        let value: u64 = parts.next()?.parse().ok()?;
        match parts.next() {
            Some(unit) if unit.eq_ignore_ascii_case("kb") => Some(value * 1024),
            None => Some(value),
            Some(_) => None,
        }
    })
}
