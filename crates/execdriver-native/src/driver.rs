//! The native exec driver.
//!
//! Coordinates the container primitive library, the pipe/terminal adapter,
//! OOM notification and exit-waiting for every container it runs, and
//! guarantees each Run, Restore and Terminate tears its container down
//! exactly once whatever path it leaves by.

use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use execdriver_common::config::{CgroupDriver, DriverConfig, DriverOptions};
use execdriver_common::constants::{
    CHECKPOINT_IMAGE_DIR, DRIVER_NAME, DRIVER_VERSION, STATE_FILE,
};
use execdriver_common::error::{DriverError, Result};
use execdriver_common::types::{ContainerId, ExitStatus};
use execdriver_core::{cgroup, procfs, reaper};
use nix::sys::signal::Signal;

use crate::backend::{Backend, CheckpointEngine, Container, ContainerFactory, FactoryOptions};
use crate::command::{Command, ProcessConfig};
use crate::create;
use crate::oom;
use crate::pipes::{self, Pipes, Terminal, Wiring};
use crate::process::ProcessSpec;
use crate::registry::{self, ActiveContainer, Registry};
use crate::stats::ResourceStats;
use crate::wait::ExitWaiter;

/// Called once the container process has a PID, with its terminal.
///
/// Restore passes `0` as the PID when no process was ever produced.
pub type StartCallback = Box<dyn FnOnce(&ProcessConfig, i32, Arc<Terminal>) + Send>;

/// The native exec driver.
#[derive(Debug)]
pub struct Driver {
    pub(crate) init_path: PathBuf,
    pub(crate) checkpoint_root: PathBuf,
    pub(crate) registry: Registry,
    pub(crate) machine_memory: u64,
    pub(crate) cgroup_driver: CgroupDriver,
    pub(crate) factory: Arc<dyn ContainerFactory>,
    pub(crate) engine: Arc<dyn CheckpointEngine>,
}

impl Driver {
    /// Creates a driver from `config`, opening a container factory through
    /// `backend` and checkpointing through `engine`.
    ///
    /// # Errors
    ///
    /// Returns an error if host memory cannot be read, the state root cannot
    /// be created, an option is invalid, or the factory cannot be opened.
    pub fn new(
        config: DriverConfig,
        backend: &dyn Backend,
        engine: Arc<dyn CheckpointEngine>,
    ) -> Result<Self> {
        let machine_memory = procfs::total_memory()?;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&config.root)
            .map_err(|e| DriverError::io(&config.root, e))?;
        let options = DriverOptions::parse(&config.options, cgroup::systemd_available())?;

        let factory = backend.open(&FactoryOptions {
            root: config.root.clone(),
            cgroup_driver: options.cgroup_driver,
            init_args: vec![
                config.init_path.to_string_lossy().into_owned(),
                DRIVER_NAME.to_owned(),
            ],
        })?;
        tracing::info!(
            root = %config.root.display(),
            cgroup_driver = %options.cgroup_driver,
            machine_memory,
            "native driver initialised"
        );

        Ok(Self {
            init_path: config.init_path,
            checkpoint_root: config.checkpoint_root,
            registry: Registry::new(config.root),
            machine_memory,
            cgroup_driver: options.cgroup_driver,
            factory,
            engine,
        })
    }

    /// Runs `command` to completion.
    ///
    /// The container is destroyed and unregistered before this returns,
    /// on every path.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is already active, cannot be
    /// created or started, or its process cannot be waited on. A non-zero
    /// exit code is not an error.
    pub async fn run(
        &self,
        command: &Command,
        pipes: Pipes,
        start_callback: Option<StartCallback>,
    ) -> Result<ExitStatus> {
        let id = &command.id;
        if self.registry.contains(id) {
            return Err(DriverError::AlreadyActive { id: id.to_string() });
        }
        let config = create::container_config(command, self.cgroup_driver)?;
        let Wiring {
            terminal,
            io,
            copiers,
        } = pipes::setup(&config, &command.process_config, pipes)?;

        let container = self.factory.create(id, &config)?;
        self.registry
            .adopt(id, ActiveContainer::Native(Arc::clone(&container)))?;
        let mut teardown = Teardown::new(&self.registry, Arc::clone(&container));
        tracing::info!(id = %id, "container created");

        let mut process = container.start(ProcessSpec::for_command(command, io))?;
        copiers.detach();
        tracing::info!(id = %id, "container started");

        if let Some(callback) = start_callback {
            match process.pid() {
                Ok(pid) => callback(&command.process_config, pid, Arc::clone(&terminal)),
                Err(e) => {
                    if let Err(kill) = process.signal(Signal::SIGKILL) {
                        tracing::warn!(id = %id, error = %kill, "failed to kill unresolved process");
                    }
                    match tokio::task::spawn_blocking(move || process.wait()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(reap)) => {
                            tracing::warn!(id = %id, error = %reap, "failed to reap unresolved process");
                        }
                        Err(join) => {
                            tracing::warn!(id = %id, error = %join, "reap of unresolved process aborted");
                        }
                    }
                    return Err(e);
                }
            }
        }

        let oom = oom::notify_on_oom(container.as_ref());
        let waiter = ExitWaiter::for_config(&config);
        let waited = {
            let container = Arc::clone(&container);
            tokio::task::spawn_blocking(move || waiter.wait(process.as_mut(), container.as_ref()))
                .await
        };
        let status = waited.map_err(|e| DriverError::Process {
            pid: None,
            message: format!("exit wait aborted: {e}"),
        })??;

        teardown.destroy();
        let oom_killed = oom.drain().await;
        let exit_code = reaper::exit_code(&status);
        tracing::info!(id = %id, exit_code, oom_killed, "container exited");
        Ok(ExitStatus {
            exit_code,
            oom_killed,
        })
    }

    /// Sends `signal` to the init process of an active container.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if `id` is not active, or an error
    /// if its state cannot be read or the signal cannot be delivered.
    pub fn kill(&self, id: &ContainerId, signal: Signal) -> Result<()> {
        let pid = self.registry.lookup(id)?.init_pid()?;
        tracing::debug!(id = %id, pid, ?signal, "signalling container");
        reaper::signal(pid, signal)
    }

    /// Freezes an active container.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if `id` is not active.
    pub fn pause(&self, id: &ContainerId) -> Result<()> {
        self.registry.lookup(id)?.container().pause()?;
        tracing::info!(id = %id, "container paused");
        Ok(())
    }

    /// Thaws a frozen container.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if `id` is not active.
    pub fn unpause(&self, id: &ContainerId) -> Result<()> {
        self.registry.lookup(id)?.container().resume()?;
        tracing::info!(id = %id, "container unpaused");
        Ok(())
    }

    /// Hard-kills a container loaded from its persisted state, whether or
    /// not this driver instance is running it.
    ///
    /// The init PID is only signalled if its start time still matches the
    /// recorded one, so a recycled PID is never hit. The container is always
    /// destroyed and its state directory removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be loaded or its process
    /// cannot be inspected or killed.
    pub fn terminate(&self, id: &ContainerId) -> Result<()> {
        let container = match self.factory.load(id) {
            Ok(container) => container,
            Err(e) => {
                if let Err(clean) = self.registry.unregister(id) {
                    tracing::warn!(id = %id, error = %clean, "failed to clean container state");
                }
                return Err(e);
            }
        };
        let _teardown = Teardown::new(&self.registry, Arc::clone(&container));

        let state = container.state()?;
        let pid = state.init_process_pid;
        let current = match procfs::process_start_time(pid) {
            Ok(start) => start,
            Err(_) if procfs::process_state(pid).is_none() => {
                tracing::info!(id = %id, pid, "init process already gone");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if current != state.init_process_start_time {
            tracing::warn!(id = %id, pid, "pid was recycled, not signalling");
            return Ok(());
        }

        reaper::signal(pid, Signal::SIGKILL)?;
        if let Err(e) = reaper::wait(pid) {
            tracing::debug!(id = %id, pid, error = %e, "killed process not reaped here");
        }
        tracing::info!(id = %id, pid, "container terminated");
        Ok(())
    }

    /// Collects a resource snapshot of an active container.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotRunning`] if `id` is not active, or an
    /// error if its cgroup cannot be read.
    pub fn stats(&self, id: &ContainerId) -> Result<ResourceStats> {
        let entry = self
            .registry
            .get(id)
            .ok_or_else(|| DriverError::NotRunning { id: id.to_string() })?;
        let container = entry.container();
        let stats = container.stats()?;
        let limit = container.config().cgroups.memory;
        Ok(ResourceStats::new(stats, limit, self.machine_memory))
    }

    /// Lists the host PIDs in an active container's cgroup.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if `id` is not active.
    pub fn pids_for_container(&self, id: &ContainerId) -> Result<Vec<i32>> {
        self.registry.lookup(id)?.container().processes()
    }

    /// Returns an inspector for `id`.
    #[must_use]
    pub fn info(&self, id: &ContainerId) -> Info<'_> {
        Info {
            driver: self,
            id: id.clone(),
        }
    }

    /// Driver name and version, as `native-0.2`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{DRIVER_NAME}-{DRIVER_VERSION}")
    }

    /// Removes the private state directory of `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn clean(&self, id: &ContainerId) -> Result<()> {
        registry::remove_state_dir(&self.registry.state_dir(id))
    }

    /// Whether `id` is currently managed by this driver.
    #[must_use]
    pub fn is_active(&self, id: &ContainerId) -> bool {
        self.registry.contains(id)
    }

    /// Number of containers currently managed by this driver.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Private state directory of `id`.
    #[must_use]
    pub fn state_dir(&self, id: &ContainerId) -> PathBuf {
        self.registry.state_dir(id)
    }

    /// Directory the checkpoint image of `id` is written to.
    #[must_use]
    pub fn checkpoint_image_dir(&self, id: &ContainerId) -> PathBuf {
        self.checkpoint_root.join(id).join(CHECKPOINT_IMAGE_DIR)
    }

    /// Root of the private state directories.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.registry.root()
    }
}

/// Read-only view of one container's on-disk presence.
#[derive(Debug)]
pub struct Info<'a> {
    driver: &'a Driver,
    id: ContainerId,
}

impl Info<'_> {
    /// Whether the container's runtime state file exists.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.driver.state_dir(&self.id).join(STATE_FILE).exists()
    }
}

/// Destroys a container and removes its registry entry and state directory
/// when dropped.
///
/// [`Teardown::destroy`] may be called earlier to destroy before reading
/// results that depend on it; the drop then only unregisters.
pub(crate) struct Teardown<'a> {
    registry: &'a Registry,
    container: Arc<dyn Container>,
    destroyed: bool,
}

impl<'a> Teardown<'a> {
    pub(crate) fn new(registry: &'a Registry, container: Arc<dyn Container>) -> Self {
        Self {
            registry,
            container,
            destroyed: false,
        }
    }

    pub(crate) fn destroy(&mut self) {
        if std::mem::replace(&mut self.destroyed, true) {
            return;
        }
        if let Err(e) = self.container.destroy() {
            tracing::warn!(id = %self.container.id(), error = %e, "failed to destroy container");
        }
    }
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        self.destroy();
        let id = self.container.id();
        if let Err(e) = self.registry.unregister(id) {
            tracing::warn!(id = %id, error = %e, "failed to clean container state");
        }
    }
}
