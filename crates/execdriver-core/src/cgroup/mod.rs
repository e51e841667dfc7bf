//! Cgroup manager detection.
//!
//! The container primitive library owns the cgroup hierarchy; the driver
//! only decides which manager it asks the library to use.

use std::path::Path;

use execdriver_common::constants::SYSTEMD_RUNTIME_DIR;

pub use execdriver_common::config::CgroupDriver;

/// Returns whether systemd is the running init and can manage cgroups.
#[must_use]
pub fn systemd_available() -> bool {
    is_systemd_booted(Path::new(SYSTEMD_RUNTIME_DIR))
}

fn is_systemd_booted(runtime_dir: &Path) -> bool {
    let booted = runtime_dir.is_dir();
    tracing::debug!(booted, "probed for systemd");
    booted
}
