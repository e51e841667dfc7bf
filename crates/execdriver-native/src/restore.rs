//! Restoring a container from its checkpoint image.
//!
//! The engine runs on a blocking thread and reports back on two one-shot
//! channels: `live` fires once the restored init has a PID, `outcome`
//! carries the final exit code or error. Whichever fires first decides
//! whether the restore failed early or is now being waited on.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use execdriver_common::error::{DriverError, Result};
use execdriver_common::types::{ContainerId, ExitStatus};
use execdriver_core::reaper;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::RecvError;

use crate::backend::{Container, RestoreHelper, RestoreRequest};
use crate::command::{Command, ProcessConfig};
use crate::driver::{Driver, StartCallback, Teardown};
use crate::oom;
use crate::pipes::{self, Pipes, Terminal, Wiring};
use crate::registry::ActiveContainer;
use crate::state;

impl Driver {
    /// Restores `command.id` from its checkpoint image and waits for the
    /// restored process to exit.
    ///
    /// The container layout comes from the image, not from `command`; only
    /// the process settings and streams are taken from it. `restore_callback`
    /// is called exactly once with the live PID, or with `0` if the engine
    /// failed before producing a process.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if there is no image for the
    /// container, or the first error hit while recreating it, wiring its
    /// streams, or running the engine.
    pub async fn restore(
        &self,
        command: &Command,
        pipes: Pipes,
        restore_callback: Option<StartCallback>,
    ) -> Result<ExitStatus> {
        let id = &command.id;
        let image_dir = self.checkpoint_image_dir(id);
        if !image_dir.is_dir() {
            return Err(DriverError::NotFound {
                kind: "checkpoint image",
                id: id.to_string(),
            });
        }
        if self.registry.contains(id) {
            return Err(DriverError::AlreadyActive { id: id.to_string() });
        }

        let config = state::read_container_config(&image_dir)?;
        let Wiring {
            terminal,
            io,
            copiers,
        } = pipes::setup(&config, &command.process_config, pipes)?;

        let container = self.factory.create(id, &config)?;
        let pid_cell = Arc::new(OnceLock::new());
        self.registry.adopt(
            id,
            ActiveContainer::Restored {
                container: Arc::clone(&container),
                pid: Arc::clone(&pid_cell),
            },
        )?;
        let mut teardown = Teardown::new(&self.registry, Arc::clone(&container));
        reaper::become_subreaper()?;

        let (outcome_tx, mut outcome_rx) = oneshot::channel::<Result<i32>>();
        let (live_tx, mut live_rx) = oneshot::channel::<()>();
        let request = RestoreRequest {
            container: Arc::clone(&container),
            io,
            state_dir: self.registry.state_dir(id),
            image_dir,
            helper: RestoreHelper {
                init_path: self.init_path.clone(),
            },
        };
        let engine = Arc::clone(&self.engine);
        let on_live = LiveHandler {
            id: id.clone(),
            container: Arc::clone(&container),
            state_dir: request.state_dir.clone(),
            pid: Arc::clone(&pid_cell),
            live: Some(live_tx),
            callback: restore_callback,
            process_config: command.process_config.clone(),
            terminal,
        };
        let _ = tokio::task::spawn_blocking(move || {
            let mut on_live = on_live;
            let outcome = engine.restore(request, &mut |pid| on_live.restored(pid));
            let _ = outcome_tx.send(outcome);
        });

        let early = tokio::select! {
            outcome = &mut outcome_rx => Some(outcome),
            Ok(()) = &mut live_rx => None,
        };
        // A very short-lived process can finish before the live signal is
        // observed; the PID cell tells that apart from an early failure.
        let early = match early {
            Some(outcome) if pid_cell.get().is_none() => {
                let exit_code = settle(outcome)?;
                tracing::warn!(id = %id, exit_code, "restore ended before the process was live");
                return Ok(ExitStatus {
                    exit_code,
                    oom_killed: false,
                });
            }
            early => early,
        };

        copiers.detach();
        tracing::info!(id = %id, "container restored");
        let oom = oom::notify_on_oom(container.as_ref());
        let outcome = match early {
            Some(outcome) => outcome,
            None => outcome_rx.await,
        };
        let exit_code = settle(outcome)?;

        teardown.destroy();
        let oom_killed = oom.drain().await;
        tracing::info!(id = %id, exit_code, oom_killed, "restored container exited");
        Ok(ExitStatus {
            exit_code,
            oom_killed,
        })
    }
}

fn settle(outcome: std::result::Result<Result<i32>, RecvError>) -> Result<i32> {
    outcome.unwrap_or_else(|_| {
        Err(DriverError::Engine {
            message: "restore task ended without reporting an outcome".into(),
        })
    })
}

/// State the engine's `on_restored` hook needs, moved onto the engine thread.
struct LiveHandler {
    id: ContainerId,
    container: Arc<dyn Container>,
    state_dir: PathBuf,
    pid: Arc<OnceLock<i32>>,
    live: Option<oneshot::Sender<()>>,
    callback: Option<StartCallback>,
    process_config: ProcessConfig,
    terminal: Arc<Terminal>,
}

impl LiveHandler {
    fn restored(&mut self, pid: i32) -> Result<()> {
        if pid == 0 {
            tracing::warn!(id = %self.id, "restore produced no process");
            self.notify(0);
            return Ok(());
        }
        // Persisted only now: the engine fixes up stream descriptors while
        // restoring.
        if let Err(e) = state::write_container_config(&self.state_dir, &self.container.config()) {
            tracing::warn!(id = %self.id, error = %e, "failed to persist restored container config");
        }
        let _ = self.pid.set(pid);
        if let Some(live) = self.live.take() {
            let _ = live.send(());
        }
        tracing::info!(id = %self.id, pid, "restored process is live");
        self.notify(pid);
        Ok(())
    }

    fn notify(&mut self, pid: i32) {
        if let Some(callback) = self.callback.take() {
            callback(&self.process_config, pid, Arc::clone(&self.terminal));
        }
    }
}
