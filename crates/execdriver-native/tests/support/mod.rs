//! In-process stand-ins for the container primitive library and the
//! checkpoint/restore engine.
//!
//! A "container" here is a host process group: the init process is started
//! in a fresh group, and everything it forks stays in that group, which
//! plays the part of the cgroup for listing, freezing, and killing.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::os::fd::OwnedFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use execdriver_common::config::DriverConfig;
use execdriver_common::constants::CONTAINER_FILE;
use execdriver_common::error::{DriverError, Result};
use execdriver_common::types::ContainerId;
use execdriver_core::{procfs, reaper};
use execdriver_native::backend::{
    Backend, CheckpointEngine, Container, ContainerFactory, ContainerProcess, FactoryOptions,
    RestoreRequest,
};
use execdriver_native::command::{Command, ProcessConfig};
use execdriver_native::container::ContainerConfig;
use execdriver_native::process::{ProcessIo, ProcessSpec};
use execdriver_native::state::{self, RuntimeState};
use execdriver_native::stats::ContainerStats;
use execdriver_native::Driver;
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use tokio::sync::mpsc;

/// File the fake engine stores the checkpointed command line in.
pub const CMDLINE_IMAGE: &str = "cmdline.json";

/// While this file exists in the image directory the fake engine holds the
/// restore before the process goes live.
pub const RESTORE_HOLD: &str = "hold";

/// Environment entry that makes the fake process unable to report its PID.
pub const UNKNOWN_PID_ENV: &str = "FAKE_PID=unknown";

/// Installs a test subscriber once per binary; `RUST_LOG` controls output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How a fake container answers OOM subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OomMode {
    /// `notify_oom` fails as on a kernel without memory cgroup events.
    Unsupported,
    /// Subscription works, no OOM ever happens.
    Quiet,
    /// The init process is SIGKILLed right after start and an OOM event is sent.
    KillOnStart,
    /// As `KillOnStart`, but the monitor forwards the event only after the
    /// container has had time to be destroyed.
    KillOnStartLateEvent,
}

/// Entry point of the fake primitive library.
#[derive(Debug, Clone, Copy)]
pub struct FakeBackend {
    pub oom: OomMode,
}

impl Backend for FakeBackend {
    fn open(&self, options: &FactoryOptions) -> Result<Arc<dyn ContainerFactory>> {
        assert_eq!(options.init_args.get(1).map(String::as_str), Some("native"));
        Ok(Arc::new(FakeFactory {
            root: options.root.clone(),
            oom: self.oom,
        }))
    }
}

#[derive(Debug)]
pub struct FakeFactory {
    root: PathBuf,
    oom: OomMode,
}

impl ContainerFactory for FakeFactory {
    fn create(&self, id: &ContainerId, config: &ContainerConfig) -> Result<Arc<dyn Container>> {
        let dir = self.root.join(id);
        if dir.join(CONTAINER_FILE).exists() {
            return Err(DriverError::Container {
                id: id.to_string(),
                message: "container with id exists".into(),
            });
        }
        std::fs::create_dir_all(&dir).map_err(|e| DriverError::io(&dir, e))?;
        state::write_container_config(&dir, config)?;
        Ok(Arc::new(FakeContainer::new(id.clone(), dir, config.clone(), self.oom)))
    }

    fn load(&self, id: &ContainerId) -> Result<Arc<dyn Container>> {
        let dir = self.root.join(id);
        let config = state::read_container_config(&dir)?;
        Ok(Arc::new(FakeContainer::new(
            id.clone(),
            dir,
            config,
            OomMode::Unsupported,
        )))
    }
}

#[derive(Debug)]
pub struct FakeContainer {
    id: ContainerId,
    dir: PathBuf,
    config: ContainerConfig,
    oom: OomMode,
    oom_tx: Mutex<Option<mpsc::Sender<()>>>,
    oom_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl FakeContainer {
    fn new(id: ContainerId, dir: PathBuf, config: ContainerConfig, oom: OomMode) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            id,
            dir,
            config,
            oom,
            oom_tx: Mutex::new(Some(tx)),
            oom_rx: Mutex::new(Some(rx)),
        }
    }

    fn group(&self) -> Result<Pid> {
        Ok(Pid::from_raw(self.state()?.init_process_pid))
    }

    fn signal_group(&self, signal: Signal) -> Result<()> {
        match killpg(self.group()?, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(DriverError::syscall("killpg", e)),
        }
    }
}

impl Container for FakeContainer {
    fn id(&self) -> &ContainerId {
        &self.id
    }

    fn config(&self) -> ContainerConfig {
        self.config.clone()
    }

    fn start(&self, spec: ProcessSpec) -> Result<Box<dyn ContainerProcess>> {
        let pid_known = !spec.env.iter().any(|kv| kv == UNKNOWN_PID_ENV);
        let (child, pid) = spawn(&spec.args, &spec.env, &spec.cwd, spec.io)?;
        record_state(&self.dir, pid)?;
        match self.oom {
            OomMode::KillOnStart => {
                reaper::signal(pid, Signal::SIGKILL)?;
                if let Some(tx) = self.oom_tx.lock().unwrap().as_ref() {
                    let _ = tx.try_send(());
                }
            }
            OomMode::KillOnStartLateEvent => {
                reaper::signal(pid, Signal::SIGKILL)?;
                // The monitor thread keeps the channel open until it has sent.
                if let Some(tx) = self.oom_tx.lock().unwrap().clone() {
                    let _ = std::thread::spawn(move || {
                        std::thread::sleep(Duration::from_millis(300));
                        let _ = tx.blocking_send(());
                    });
                }
            }
            OomMode::Unsupported | OomMode::Quiet => {}
        }
        Ok(Box::new(FakeProcess {
            child,
            pid,
            pid_known,
        }))
    }

    fn state(&self) -> Result<RuntimeState> {
        state::read_runtime_state(&self.dir)
    }

    fn stats(&self) -> Result<ContainerStats> {
        Ok(ContainerStats {
            pids: self.processes()?.len() as u64,
            ..ContainerStats::default()
        })
    }

    fn pause(&self) -> Result<()> {
        self.signal_group(Signal::SIGSTOP)
    }

    fn resume(&self) -> Result<()> {
        self.signal_group(Signal::SIGCONT)
    }

    fn destroy(&self) -> Result<()> {
        drop(self.oom_tx.lock().unwrap().take());
        if self.state().is_ok() {
            self.signal_group(Signal::SIGKILL)?;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(DriverError::io(&self.dir, e)),
            _ => Ok(()),
        }
    }

    // Nothing started yet: the group is empty.
    fn processes(&self) -> Result<Vec<i32>> {
        Ok(self
            .state()
            .map(|state| group_members(state.init_process_pid))
            .unwrap_or_default())
    }

    fn notify_oom(&self) -> Result<mpsc::Receiver<()>> {
        if self.oom == OomMode::Unsupported {
            return Err(DriverError::Unsupported {
                feature: "oom notification",
                reason: "memory cgroup events not available".into(),
            });
        }
        self.oom_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| DriverError::Container {
                id: self.id.to_string(),
                message: "already subscribed".into(),
            })
    }
}

pub struct FakeProcess {
    child: Child,
    pid: i32,
    pid_known: bool,
}

impl ContainerProcess for FakeProcess {
    fn pid(&self) -> Result<i32> {
        if !self.pid_known {
            return Err(DriverError::Process {
                pid: None,
                message: "pid not reported".into(),
            });
        }
        Ok(self.pid)
    }

    fn signal(&self, signal: Signal) -> Result<()> {
        reaper::signal(self.pid, signal)
    }

    fn wait(&mut self) -> Result<WaitStatus> {
        wait_child(&mut self.child, self.pid)
    }
}

/// Checkpoints by recording the init command line and killing the group;
/// restores by re-running it. Programs that keep their progress in files
/// carry on where they left off.
#[derive(Debug, Default)]
pub struct FakeEngine;

impl CheckpointEngine for FakeEngine {
    fn checkpoint(&self, container: &dyn Container, image_dir: &Path, pid: i32) -> Result<()> {
        let path = format!("/proc/{pid}/cmdline");
        let raw = std::fs::read(&path).map_err(|e| DriverError::io(&path, e))?;
        let args: Vec<String> = raw
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect();
        let image = image_dir.join(CMDLINE_IMAGE);
        std::fs::write(&image, serde_json::to_vec(&args)?).map_err(|e| DriverError::io(&image, e))?;
        for member in container.processes()? {
            let _ = reaper::signal(member, Signal::SIGKILL);
        }
        Ok(())
    }

    fn restore(
        &self,
        request: RestoreRequest,
        on_restored: &mut dyn FnMut(i32) -> Result<()>,
    ) -> Result<i32> {
        let image = request.image_dir.join(CMDLINE_IMAGE);
        let args: Vec<String> = match std::fs::read(&image) {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) => {
                on_restored(0)?;
                return Err(DriverError::Engine {
                    message: format!("no image at {}: {e}", image.display()),
                });
            }
        };
        let helper = request.helper.command(&args);
        assert!(helper.get_args().any(|arg| arg == "-restore"));
        while request.image_dir.join(RESTORE_HOLD).exists() {
            std::thread::sleep(Duration::from_millis(20));
        }

        let (mut child, pid) = spawn(&args, &[], "/", request.io)?;
        record_state(&request.state_dir, pid)?;
        on_restored(pid)?;
        let status = wait_child(&mut child, pid)?;
        Ok(reaper::exit_code(&status))
    }
}

/// A driver rooted in `tmp` on top of the fakes.
pub fn driver(tmp: &Path, oom: OomMode) -> Driver {
    init_tracing();
    Driver::new(
        DriverConfig {
            root: tmp.join("state"),
            init_path: PathBuf::from("/usr/bin/dockerinit"),
            checkpoint_root: tmp.join("containers"),
            options: Vec::new(),
        },
        &FakeBackend { oom },
        Arc::new(FakeEngine),
    )
    .unwrap()
}

/// A command running `entrypoint args...` in `/`.
pub fn command(id: &str, entrypoint: &str, args: &[&str]) -> Command {
    Command {
        id: id.into(),
        rootfs: "/".into(),
        working_dir: "/".into(),
        process_config: ProcessConfig {
            entrypoint: entrypoint.into(),
            arguments: args.iter().map(ToString::to_string).collect(),
            env: vec!["PATH=/usr/local/bin:/usr/bin:/bin".into()],
            ..ProcessConfig::default()
        },
        ..Command::default()
    }
}

/// Polls `check` every 20ms for up to 5s.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Host PIDs whose process group is `pgid`.
pub fn group_members(pgid: i32) -> Vec<i32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse::<i32>().ok())
        .filter(|pid| {
            std::fs::read_to_string(format!("/proc/{pid}/stat"))
                .ok()
                .and_then(|stat| {
                    let rest = &stat[stat.rfind(')')? + 1..];
                    rest.split_whitespace().nth(2)?.parse::<i32>().ok()
                })
                == Some(pgid)
        })
        .collect()
}

fn spawn(args: &[String], env: &[String], cwd: &str, io: ProcessIo) -> Result<(Child, i32)> {
    let (program, rest) = args.split_first().ok_or_else(|| DriverError::Process {
        pid: None,
        message: "empty command line".into(),
    })?;
    let mut cmd = std::process::Command::new(program);
    let _ = cmd
        .args(rest)
        .process_group(0)
        .stdin(stdio(io.stdin))
        .stdout(stdio(io.stdout))
        .stderr(stdio(io.stderr));
    if !env.is_empty() {
        let _ = cmd.env_clear();
        for (key, value) in env.iter().filter_map(|kv| kv.split_once('=')) {
            let _ = cmd.env(key, value);
        }
    }
    if !cwd.is_empty() {
        let _ = cmd.current_dir(cwd);
    }
    let child = cmd.spawn().map_err(|e| DriverError::Process {
        pid: None,
        message: format!("exec {program}: {e}"),
    })?;
    // Our copies of the process's stream ends must close now.
    drop(cmd);
    let pid = i32::try_from(child.id()).unwrap();
    Ok((child, pid))
}

fn stdio(fd: Option<OwnedFd>) -> Stdio {
    fd.map_or_else(Stdio::null, Stdio::from)
}

fn record_state(dir: &Path, pid: i32) -> Result<()> {
    state::write_runtime_state(
        dir,
        &RuntimeState {
            init_process_pid: pid,
            init_process_start_time: procfs::process_start_time(pid)?,
            ..RuntimeState::default()
        },
    )
}

fn wait_child(child: &mut Child, pid: i32) -> Result<WaitStatus> {
    let status = child.wait().map_err(|e| DriverError::Process {
        pid: Some(pid),
        message: e.to_string(),
    })?;
    let pid_t = Pid::from_raw(pid);
    match (status.code(), status.signal()) {
        (Some(code), _) => Ok(WaitStatus::Exited(pid_t, code)),
        (None, Some(signal)) => Ok(WaitStatus::Signaled(
            pid_t,
            Signal::try_from(signal).map_err(|e| DriverError::syscall("wait", e))?,
            status.core_dumped(),
        )),
        (None, None) => Err(DriverError::Process {
            pid: Some(pid),
            message: format!("unexpected status {status}"),
        }),
    }
}
