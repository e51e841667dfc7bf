//! Wiring of caller-supplied standard streams to a container process.
//!
//! Two modes, picked from [`ProcessConfig::tty`]:
//!
//! - TTY: a pseudo-terminal is allocated, the process gets the slave as all
//!   three streams, and the driver copies between the master and the
//!   caller's stdin/stdout.
//! - Standard: each supplied stream gets an OS pipe; the process gets one
//!   end and a copy task services the other.
//!
//! Everything is allocated before the first copy task is spawned, so a
//! failed setup leaves nothing running.

use std::fmt;
use std::future::Future;
use std::os::fd::OwnedFd;
use std::pin::Pin;
use std::sync::Arc;

use execdriver_common::error::{DriverError, Result};
use execdriver_core::console::Console;
use nix::fcntl::OFlag;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::task::JoinHandle;

use crate::command::ProcessConfig;
use crate::container::ContainerConfig;
use crate::process::ProcessIo;

/// A caller-side source of bytes for the process's stdin.
pub type InputStream = Box<dyn AsyncRead + Send + Unpin>;

/// A caller-side sink for the process's stdout or stderr.
///
/// Shut down once the process side reaches end-of-file.
pub type OutputStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Caller-supplied stream endpoints. Absent streams are `/dev/null`.
#[derive(Default)]
pub struct Pipes {
    /// Source for the process's stdin.
    pub stdin: Option<InputStream>,
    /// Sink for the process's stdout.
    pub stdout: Option<OutputStream>,
    /// Sink for the process's stderr. Unused in TTY mode.
    pub stderr: Option<OutputStream>,
}

impl Pipes {
    /// Bundles the three endpoints.
    #[must_use]
    pub fn new(
        stdin: Option<InputStream>,
        stdout: Option<OutputStream>,
        stderr: Option<OutputStream>,
    ) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
        }
    }
}

impl fmt::Debug for Pipes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipes")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// The terminal side of a running process, handed to start callbacks.
#[derive(Debug)]
pub enum Terminal {
    /// A pseudo-terminal; the driver holds the master.
    Tty(Console),
    /// Plain pipes. Resizing is a no-op.
    Std,
}

impl Terminal {
    /// Sets the terminal geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if the pseudo-terminal rejects the new size.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        match self {
            Self::Tty(console) => console.resize(rows, cols),
            Self::Std => Ok(()),
        }
    }

    /// Whether the process is attached to a pseudo-terminal.
    #[must_use]
    pub const fn is_tty(&self) -> bool {
        matches!(self, Self::Tty(_))
    }
}

type CopyJob = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Running copy tasks of one process.
///
/// Dropping this aborts the tasks; call [`Copiers::detach`] once the
/// process has started so they run until their streams close.
#[derive(Debug, Default)]
pub(crate) struct Copiers {
    tasks: Vec<JoinHandle<()>>,
}

impl Copiers {
    fn spawn(jobs: Vec<CopyJob>) -> Self {
        Self {
            tasks: jobs.into_iter().map(tokio::spawn).collect(),
        }
    }

    /// Lets the copy tasks run to completion on their own.
    pub(crate) fn detach(mut self) {
        self.tasks.clear();
    }
}

impl Drop for Copiers {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// The outcome of [`setup`].
#[derive(Debug)]
pub(crate) struct Wiring {
    pub(crate) terminal: Arc<Terminal>,
    pub(crate) io: ProcessIo,
    pub(crate) copiers: Copiers,
}

/// Allocates a pty or pipes for `process` and starts the copy tasks.
///
/// Must be called from within a tokio runtime.
pub(crate) fn setup(
    config: &ContainerConfig,
    process: &ProcessConfig,
    pipes: Pipes,
) -> Result<Wiring> {
    let (terminal, io, jobs) = if process.tty {
        tty(config.host_uid()?, pipes)?
    } else {
        std_pipes(pipes)?
    };
    tracing::debug!(tty = process.tty, copiers = jobs.len(), "pipes wired");
    Ok(Wiring {
        terminal: Arc::new(terminal),
        io,
        copiers: Copiers::spawn(jobs),
    })
}

fn tty(owner_uid: u32, pipes: Pipes) -> Result<(Terminal, ProcessIo, Vec<CopyJob>)> {
    let (console, slave) = Console::open(owner_uid)?;
    let io = ProcessIo {
        stdin: Some(dup(&slave)?),
        stdout: Some(dup(&slave)?),
        stderr: Some(slave),
        console: true,
    };

    let mut jobs: Vec<CopyJob> = Vec::new();
    if let Some(stdout) = pipes.stdout {
        let master = tokio::fs::File::from_std(console.master_file()?);
        jobs.push(Box::pin(pump(master, stdout, "console-out")));
    }
    if let Some(stdin) = pipes.stdin {
        let master = tokio::fs::File::from_std(console.master_file()?);
        jobs.push(Box::pin(pump(stdin, master, "console-in")));
    }
    Ok((Terminal::Tty(console), io, jobs))
}

fn std_pipes(pipes: Pipes) -> Result<(Terminal, ProcessIo, Vec<CopyJob>)> {
    let mut io = ProcessIo::default();
    let mut jobs: Vec<CopyJob> = Vec::new();

    if let Some(stdin) = pipes.stdin {
        let (read, write) = os_pipe()?;
        let sender = pipe::Sender::from_owned_fd(write).map_err(|e| DriverError::io("pipe", e))?;
        io.stdin = Some(read);
        jobs.push(Box::pin(pump(stdin, sender, "stdin")));
    }
    for (sink, slot, name) in [
        (pipes.stdout, &mut io.stdout, "stdout"),
        (pipes.stderr, &mut io.stderr, "stderr"),
    ] {
        if let Some(sink) = sink {
            let (read, write) = os_pipe()?;
            let receiver =
                pipe::Receiver::from_owned_fd(read).map_err(|e| DriverError::io("pipe", e))?;
            *slot = Some(write);
            jobs.push(Box::pin(pump(receiver, sink, name)));
        }
    }
    Ok((Terminal::Std, io, jobs))
}

// Copies until EOF or error, then shuts the writer down so the far side
// sees EOF too. A pty master reports EIO once the slave is gone; that is
// the normal end of a console stream.
async fn pump<R, W>(mut reader: R, mut writer: W, stream: &'static str)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(bytes) => tracing::debug!(stream, bytes, "stream copy finished"),
        Err(e) => tracing::debug!(stream, error = %e, "stream copy ended"),
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(stream, error = %e, "failed to close stream");
    }
}

fn os_pipe() -> Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| DriverError::syscall("pipe2", e))
}

fn dup(fd: &OwnedFd) -> Result<OwnedFd> {
    fd.try_clone().map_err(|e| DriverError::io("/dev/pts", e))
}
