//! Checkpoint and restore through the fake engine in `support`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::path::Path;
use std::sync::Arc;

use execdriver_common::config::CgroupDriver;
use execdriver_common::constants::{CONTAINER_FILE, STATE_FILE};
use execdriver_common::error::{DriverError, Result};
use execdriver_common::types::{ContainerId, ExitStatus};
use execdriver_native::Driver;
use execdriver_native::command::Command;
use execdriver_native::driver::StartCallback;
use execdriver_native::pipes::Pipes;
use execdriver_native::{create, state};
use nix::sys::signal::Signal;
use tokio::task::JoinHandle;

use support::{CMDLINE_IMAGE, OomMode, RESTORE_HOLD, command, driver, wait_until};

fn read_counter(path: &Path) -> Option<u64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn counter_script(path: &Path) -> String {
    let f = path.display();
    format!(
        "n=$(cat {f} 2>/dev/null || echo 0); \
         while :; do n=$((n+1)); echo $n > {f}.tmp; mv {f}.tmp {f}; sleep 0.2; done"
    )
}

/// Runs a counter, checkpoints it, and waits for the run to end.
/// Returns the command and the counter value at the checkpoint.
async fn checkpointed_counter(driver: &Arc<Driver>, counter: &Path) -> (Command, u64) {
    let script = counter_script(counter);
    let cmd = command("counter", "sh", &["-c", &script]);
    let run = {
        let driver = Arc::clone(driver);
        let cmd = cmd.clone();
        tokio::spawn(async move { driver.run(&cmd, Pipes::default(), None).await })
    };
    assert!(wait_until(|| read_counter(counter).is_some_and(|n| n >= 1)).await);
    assert!(driver.is_active(&cmd.id));

    driver.checkpoint(&cmd.id).unwrap();
    let status = run.await.unwrap().unwrap();
    assert_eq!(status.exit_code, 137);
    assert!(!driver.is_active(&cmd.id));
    (cmd, read_counter(counter).unwrap())
}

fn spawn_restore(
    driver: &Arc<Driver>,
    cmd: &Command,
    callback: Option<StartCallback>,
) -> JoinHandle<Result<ExitStatus>> {
    let driver = Arc::clone(driver);
    let cmd = cmd.clone();
    tokio::spawn(async move { driver.restore(&cmd, Pipes::default(), callback).await })
}

// ── Preconditions ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn checkpoint_of_inactive_container_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = driver(tmp.path(), OomMode::Quiet);

    let err = driver.checkpoint(&ContainerId::from("idle")).unwrap_err();

    assert!(matches!(err, DriverError::NotFound { .. }));
    assert!(!driver.checkpoint_image_dir(&"idle".into()).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn restore_without_image_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = driver(tmp.path(), OomMode::Quiet);
    let cmd = command("no-image", "true", &[]);

    let err = driver.restore(&cmd, Pipes::default(), None).await.unwrap_err();

    assert!(matches!(err, DriverError::NotFound { kind: "checkpoint image", .. }));
    assert_eq!(driver.active_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_metadata_copy_aborts_before_engine() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = Arc::new(driver(tmp.path(), OomMode::Quiet));
    let cmd = command("no-meta", "sleep", &["30"]);
    let run = {
        let driver = Arc::clone(&driver);
        let cmd = cmd.clone();
        tokio::spawn(async move { driver.run(&cmd, Pipes::default(), None).await })
    };
    let state_file = driver.state_dir(&cmd.id).join(STATE_FILE);
    assert!(wait_until(|| state_file.exists()).await);

    let aside = state_file.with_extension("aside");
    std::fs::rename(&state_file, &aside).unwrap();
    let err = driver.checkpoint(&cmd.id).unwrap_err();
    std::fs::rename(&aside, &state_file).unwrap();

    assert!(matches!(err, DriverError::Io { .. }), "got {err:?}");
    let image_dir = driver.checkpoint_image_dir(&cmd.id);
    assert!(!image_dir.join(CMDLINE_IMAGE).exists());
    assert!(driver.is_active(&cmd.id));

    driver.kill(&cmd.id, Signal::SIGKILL).unwrap();
    assert_eq!(run.await.unwrap().unwrap().exit_code, 137);
}

// ── Round trip ───────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn counter_keeps_increasing_across_checkpoint_and_restore() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = Arc::new(driver(tmp.path(), OomMode::Quiet));
    let counter = tmp.path().join("counter");
    let (cmd, before) = checkpointed_counter(&driver, &counter).await;
    let image_dir = driver.checkpoint_image_dir(&cmd.id);
    for name in [CONTAINER_FILE, STATE_FILE, CMDLINE_IMAGE] {
        assert!(image_dir.join(name).exists(), "{name} missing from image");
    }

    let (tx, rx) = std::sync::mpsc::channel();
    let callback: StartCallback = Box::new(move |_, pid, _| tx.send(pid).unwrap());
    let restore = spawn_restore(&driver, &cmd, Some(callback));
    assert!(wait_until(|| read_counter(&counter).is_some_and(|n| n > before)).await);
    assert!(driver.is_active(&cmd.id));
    assert!(driver.state_dir(&cmd.id).join(CONTAINER_FILE).exists());

    let pid = rx.recv().unwrap();
    assert!(pid > 0);
    assert!(driver.pids_for_container(&cmd.id).unwrap().contains(&pid));

    driver.kill(&cmd.id, Signal::SIGKILL).unwrap();
    let status = restore.await.unwrap().unwrap();
    assert_eq!(status.exit_code, 137);
    assert!(!status.oom_killed);
    assert_eq!(driver.active_count(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn kill_and_stats_before_restored_process_is_live() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = Arc::new(driver(tmp.path(), OomMode::Quiet));
    let counter = tmp.path().join("counter");
    let (cmd, before) = checkpointed_counter(&driver, &counter).await;
    let hold = driver.checkpoint_image_dir(&cmd.id).join(RESTORE_HOLD);
    std::fs::write(&hold, "").unwrap();

    let restore = spawn_restore(&driver, &cmd, None);
    assert!(wait_until(|| driver.is_active(&cmd.id)).await);

    // Registered but not live: nothing may be signalled.
    let err = driver.kill(&cmd.id, Signal::SIGKILL).unwrap_err();
    assert!(matches!(err, DriverError::NotRunning { .. }), "got {err:?}");
    let stats = driver.stats(&cmd.id).unwrap();
    assert_eq!(stats.stats.pids, 0);

    std::fs::remove_file(&hold).unwrap();
    assert!(wait_until(|| read_counter(&counter).is_some_and(|n| n > before)).await);
    driver.kill(&cmd.id, Signal::SIGKILL).unwrap();
    assert_eq!(restore.await.unwrap().unwrap().exit_code, 137);
    assert_eq!(driver.active_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn checkpoint_of_restored_container_overwrites_image() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = Arc::new(driver(tmp.path(), OomMode::Quiet));
    let counter = tmp.path().join("counter");
    let (cmd, before) = checkpointed_counter(&driver, &counter).await;
    let image_dir = driver.checkpoint_image_dir(&cmd.id);
    let first = state::read_runtime_state(&image_dir).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    let callback: StartCallback = Box::new(move |_, pid, _| tx.send(pid).unwrap());
    let restore = spawn_restore(&driver, &cmd, Some(callback));
    let pid = rx.recv().unwrap();
    assert!(wait_until(|| read_counter(&counter).is_some_and(|n| n > before)).await);

    driver.checkpoint(&cmd.id).unwrap();

    let second = state::read_runtime_state(&image_dir).unwrap();
    assert_eq!(second.init_process_pid, pid);
    assert_ne!(second, first);
    assert!(image_dir.join(CMDLINE_IMAGE).exists());
    assert_eq!(restore.await.unwrap().unwrap().exit_code, 137);
    assert_eq!(driver.active_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_restore_reports_pid_zero_once() {
    let tmp = tempfile::tempdir().unwrap();
    let driver: Driver = driver(tmp.path(), OomMode::Quiet);
    let cmd = command("broken", "sleep", &["30"]);

    // An image with metadata but no engine data.
    let image_dir = driver.checkpoint_image_dir(&cmd.id);
    std::fs::create_dir_all(&image_dir).unwrap();
    let config = create::container_config(&cmd, CgroupDriver::Cgroupfs).unwrap();
    state::write_container_config(&image_dir, &config).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    let callback: StartCallback = Box::new(move |_, pid, _| tx.send(pid).unwrap());
    let err = driver
        .restore(&cmd, Pipes::default(), Some(callback))
        .await
        .unwrap_err();

    assert!(matches!(err, DriverError::Engine { .. }), "got {err:?}");
    assert_eq!(rx.recv().unwrap(), 0);
    assert!(rx.try_recv().is_err());
    assert_eq!(driver.active_count(), 0);
    assert!(!driver.state_dir(&cmd.id).exists());
    assert!(image_dir.join(CONTAINER_FILE).exists());
}
