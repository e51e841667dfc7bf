//! Process descriptors handed to the container primitive library.

use std::os::fd::OwnedFd;

use crate::command::Command;

/// Standard streams of a container process.
///
/// Each descriptor is the end the process keeps; `None` means the stream is
/// connected to `/dev/null`. With `console` set all three point at the same
/// pty slave and the process gets it as its controlling terminal.
#[derive(Debug, Default)]
pub struct ProcessIo {
    /// Standard input.
    pub stdin: Option<OwnedFd>,
    /// Standard output.
    pub stdout: Option<OwnedFd>,
    /// Standard error.
    pub stderr: Option<OwnedFd>,
    /// The descriptors are a pseudo-terminal slave.
    pub console: bool,
}

/// What to execute as a container's init process.
#[derive(Debug)]
pub struct ProcessSpec {
    /// Entrypoint followed by its arguments.
    pub args: Vec<String>,
    /// Environment as `KEY=value` strings.
    pub env: Vec<String>,
    /// Working directory.
    pub cwd: String,
    /// User to run as.
    pub user: String,
    /// Standard streams.
    pub io: ProcessIo,
}

impl ProcessSpec {
    /// Builds the init process descriptor for `command` with the given streams.
    #[must_use]
    pub fn for_command(command: &Command, io: ProcessIo) -> Self {
        let process = &command.process_config;
        Self {
            args: process.args(),
            env: process.env.clone(),
            cwd: command.working_dir.clone(),
            user: process.user.clone(),
            io,
        }
    }
}
