//! Driver configuration and construction-option parsing.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{CGROUP_DRIVER_OPTION, DEFAULT_CHECKPOINT_ROOT, DEFAULT_STATE_ROOT};
use crate::error::{DriverError, Result};

/// Root configuration handed to the driver at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Root holding one private state directory per container.
    pub root: PathBuf,
    /// Init binary used to bootstrap containers and the restore helper.
    pub init_path: PathBuf,
    /// Root holding `<id>/criu_img` checkpoint images.
    pub checkpoint_root: PathBuf,
    /// Raw `key=value` construction options.
    pub options: Vec<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_STATE_ROOT),
            init_path: std::env::current_exe().unwrap_or_default(),
            checkpoint_root: PathBuf::from(DEFAULT_CHECKPOINT_ROOT),
            options: Vec::new(),
        }
    }
}

/// Which cgroup manager the container primitive library should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupDriver {
    /// Direct manipulation of the cgroup filesystem.
    #[default]
    Cgroupfs,
    /// Delegation to systemd transient units.
    Systemd,
}

impl fmt::Display for CgroupDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cgroupfs => write!(f, "cgroupfs"),
            Self::Systemd => write!(f, "systemd"),
        }
    }
}

impl FromStr for CgroupDriver {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cgroupfs" => Ok(Self::Cgroupfs),
            "systemd" => Ok(Self::Systemd),
            other => Err(DriverError::Config {
                message: format!(
                    "unknown {CGROUP_DRIVER_OPTION} given {other:?}, try cgroupfs or systemd"
                ),
            }),
        }
    }
}

/// Options recognized at driver construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverOptions {
    /// Selected cgroup manager.
    pub cgroup_driver: CgroupDriver,
}

impl DriverOptions {
    /// Parses raw `key=value` options.
    ///
    /// Keys are case-insensitive. Asking for `systemd` when systemd is not
    /// the running init falls back to `cgroupfs` with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Config`] for malformed pairs, unknown keys,
    /// or unknown values.
    pub fn parse(options: &[String], systemd_available: bool) -> Result<Self> {
        let mut parsed = Self::default();
        for option in options {
            let (key, value) = parse_key_value(option)?;
            match key.to_lowercase().as_str() {
                CGROUP_DRIVER_OPTION => {
                    parsed.cgroup_driver = match value.parse::<CgroupDriver>()? {
                        CgroupDriver::Systemd if !systemd_available => {
                            tracing::warn!(
                                "systemd cannot be used as {CGROUP_DRIVER_OPTION}, using cgroupfs instead"
                            );
                            CgroupDriver::Cgroupfs
                        }
                        driver => driver,
                    };
                }
                other => {
                    return Err(DriverError::Config {
                        message: format!("unknown option {other}"),
                    });
                }
            }
        }
        Ok(parsed)
    }
}

/// Splits `key=value`, trimming both sides.
///
/// # Errors
///
/// Returns [`DriverError::Config`] when there is no `=`.
pub fn parse_key_value(option: &str) -> Result<(&str, &str)> {
    option
        .split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .ok_or_else(|| DriverError::Config {
            message: format!("unable to parse key/value option: {option}"),
        })
}
