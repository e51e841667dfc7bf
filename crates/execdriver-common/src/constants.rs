//! Driver identity, persisted file names, and default paths.

/// Name this driver registers under.
pub const DRIVER_NAME: &str = "native";

/// Driver version reported alongside the name.
pub const DRIVER_VERSION: &str = "0.2";

/// Default root for per-container private state directories.
pub const DEFAULT_STATE_ROOT: &str = "/var/run/docker/execdriver/native";

/// Default root under which checkpoint images are kept, one directory per container.
pub const DEFAULT_CHECKPOINT_ROOT: &str = "/var/lib/docker/containers";

/// Name of the checkpoint image directory inside a container's directory.
pub const CHECKPOINT_IMAGE_DIR: &str = "criu_img";

/// Serialized container configuration, in the state dir and the image dir.
pub const CONTAINER_FILE: &str = "container.json";

/// Serialized runtime state, in the state dir and the image dir.
pub const STATE_FILE: &str = "state.json";

/// Both metadata sidecars a checkpoint image must carry.
pub const METADATA_FILES: [&str; 2] = [CONTAINER_FILE, STATE_FILE];

/// Construction option selecting the cgroup manager.
pub const CGROUP_DRIVER_OPTION: &str = "native.cgroupdriver";

/// Fd number the restore helper receives its sync pipe on.
pub const RESTORE_PIPE_FD: i32 = 3;

/// Host file providing `MemTotal`.
pub const MEMINFO_PATH: &str = "/proc/meminfo";

/// Directory whose presence means systemd is the running init.
pub const SYSTEMD_RUNTIME_DIR: &str = "/run/systemd/system";
