//! Collaborator abstractions the driver is built on.
//!
//! The driver never creates namespaces or cgroups itself and never
//! serializes process memory. Those jobs belong to a container primitive
//! library ([`Backend`] / [`ContainerFactory`] / [`Container`]) and a
//! checkpoint/restore engine ([`CheckpointEngine`]). Implementors handle the
//! platform-specific details; the driver only orchestrates.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use execdriver_common::config::CgroupDriver;
use execdriver_common::constants::{DRIVER_NAME, RESTORE_PIPE_FD};
use execdriver_common::error::Result;
use execdriver_common::types::ContainerId;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use tokio::sync::mpsc;

use crate::container::ContainerConfig;
use crate::process::{ProcessIo, ProcessSpec};
use crate::state::RuntimeState;
use crate::stats::ContainerStats;

/// Options used to open a container factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryOptions {
    /// Root under which each container keeps its private state directory.
    pub root: PathBuf,
    /// Cgroup manager the factory should drive.
    pub cgroup_driver: CgroupDriver,
    /// Command line that re-executes the init bootstrap inside a new container.
    pub init_args: Vec<String>,
}

/// Entry point into a container primitive library.
pub trait Backend: Send + Sync {
    /// Opens a factory rooted at `options.root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory cannot be initialised.
    fn open(&self, options: &FactoryOptions) -> Result<Arc<dyn ContainerFactory>>;
}

/// Creates new containers and loads existing ones from persistent state.
pub trait ContainerFactory: Debug + Send + Sync {
    /// Creates a container keyed by `id` from a declarative configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a container with this ID already exists on disk
    /// or the environment cannot be set up.
    fn create(&self, id: &ContainerId, config: &ContainerConfig) -> Result<Arc<dyn Container>>;

    /// Loads a previously created container from its state directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no persisted state exists for `id`.
    fn load(&self, id: &ContainerId) -> Result<Arc<dyn Container>>;
}

/// A handle on one isolated environment.
pub trait Container: Debug + Send + Sync {
    /// The container's ID.
    fn id(&self) -> &ContainerId;

    /// The configuration the container was created from.
    fn config(&self) -> ContainerConfig;

    /// Starts the init process.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    fn start(&self, spec: ProcessSpec) -> Result<Box<dyn ContainerProcess>>;

    /// Reads the current runtime state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    fn state(&self) -> Result<RuntimeState>;

    /// Collects resource counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the cgroup cannot be read.
    fn stats(&self) -> Result<ContainerStats>;

    /// Freezes every process in the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the freezer cannot be set.
    fn pause(&self) -> Result<()>;

    /// Thaws a frozen container.
    ///
    /// # Errors
    ///
    /// Returns an error if the freezer cannot be set.
    fn resume(&self) -> Result<()>;

    /// Tears the container down and removes its state directory.
    ///
    /// Closes any channel returned by [`Container::notify_oom`], whether or
    /// not the rest of the teardown succeeds; the driver waits on that
    /// channel afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if resources cannot be released.
    fn destroy(&self) -> Result<()>;

    /// Lists host PIDs currently in the container's cgroup.
    ///
    /// # Errors
    ///
    /// Returns an error if the cgroup cannot be read.
    fn processes(&self) -> Result<Vec<i32>>;

    /// Subscribes to out-of-memory events.
    ///
    /// The receiver yields one message per OOM kill and closes when the
    /// container is destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`execdriver_common::error::DriverError::Unsupported`] when the
    /// kernel or configuration cannot deliver OOM events.
    fn notify_oom(&self) -> Result<mpsc::Receiver<()>>;
}

/// The init process of a container, owned by the call that started it.
pub trait ContainerProcess: Send {
    /// Host PID of the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the PID is not yet known or the process is gone.
    fn pid(&self) -> Result<i32>;

    /// Delivers `signal` to the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    fn signal(&self, signal: Signal) -> Result<()>;

    /// Blocks until the process exits and releases its resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be waited on.
    fn wait(&mut self) -> Result<WaitStatus>;
}

/// Serializes live containers to disk and brings them back.
pub trait CheckpointEngine: Debug + Send + Sync {
    /// Dumps the process tree rooted at `pid` into `image_dir`, stopping it.
    ///
    /// # Errors
    ///
    /// Returns [`execdriver_common::error::DriverError::Engine`] on failure.
    fn checkpoint(&self, container: &dyn Container, image_dir: &Path, pid: i32) -> Result<()>;

    /// Recreates the process tree described by `request.image_dir` and
    /// blocks until it exits, returning its exit code.
    ///
    /// `on_restored` is called once with the restored init PID as soon as it
    /// is live, or with `0` if the restore failed before producing a process.
    ///
    /// # Errors
    ///
    /// Returns [`execdriver_common::error::DriverError::Engine`] if the
    /// restore fails, or the error returned by `on_restored`.
    fn restore(
        &self,
        request: RestoreRequest,
        on_restored: &mut dyn FnMut(i32) -> Result<()>,
    ) -> Result<i32>;
}

/// Everything the engine needs to bring a checkpoint image back to life.
#[derive(Debug)]
pub struct RestoreRequest {
    /// Container the restored processes join.
    pub container: Arc<dyn Container>,
    /// Standard streams for the restored init process.
    pub io: ProcessIo,
    /// Private state directory of the container.
    pub state_dir: PathBuf,
    /// Directory holding the checkpoint image.
    pub image_dir: PathBuf,
    /// Helper used to launch the restore.
    pub helper: RestoreHelper,
}

/// The init binary invocation that drives a restore from inside the
/// container's namespaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreHelper {
    /// Path to the init binary.
    pub init_path: PathBuf,
}

impl RestoreHelper {
    /// Builds `[init_path] native -restore -pipe 3 -- <args>`.
    ///
    /// The engine is expected to hand its sync pipe to the helper as fd 3.
    #[must_use]
    pub fn command(&self, args: &[String]) -> std::process::Command {
        use std::os::unix::process::CommandExt;

        let mut cmd = std::process::Command::new(&self.init_path);
        let _ = cmd
            .arg0(DRIVER_NAME)
            .arg("-restore")
            .arg("-pipe")
            .arg(RESTORE_PIPE_FD.to_string())
            .arg("--")
            .args(args);
        cmd
    }
}
