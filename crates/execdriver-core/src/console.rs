//! Pseudo-terminal consoles for containers started with a TTY.

use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use execdriver_common::error::{DriverError, Result};
use nix::pty::{Winsize, openpty};

nix::ioctl_write_ptr_bad!(
    /// Raw `TIOCSWINSZ`.
    set_winsize,
    libc::TIOCSWINSZ,
    Winsize
);

/// The master side of a container's pseudo-terminal.
///
/// The slave side is returned separately from [`Console::open`] so it can
/// be handed to the container process and closed in this process once the
/// process has started.
#[derive(Debug)]
pub struct Console {
    master: OwnedFd,
}

impl Console {
    /// Allocates a pseudo-terminal whose slave is owned by `owner_uid`.
    ///
    /// Both returned descriptors are close-on-exec.
    ///
    /// # Errors
    ///
    /// Returns an error if the pty cannot be allocated or chowned.
    pub fn open(owner_uid: u32) -> Result<(Self, OwnedFd)> {
        let pty = openpty(None, None).map_err(|e| DriverError::syscall("openpty", e))?;
        // try_clone duplicates with F_DUPFD_CLOEXEC; the originals are closed on drop.
        let master = pty
            .master
            .try_clone()
            .map_err(|e| DriverError::io("/dev/ptmx", e))?;
        let slave = pty
            .slave
            .try_clone()
            .map_err(|e| DriverError::io("/dev/pts", e))?;

        if owner_uid != nix::unistd::geteuid().as_raw() {
            std::os::unix::fs::fchown(slave.as_fd(), Some(owner_uid), None)
                .map_err(|e| DriverError::io("/dev/pts", e))?;
        }
        tracing::debug!(master = master.as_raw_fd(), owner_uid, "console allocated");
        Ok((Self { master }, slave))
    }

    /// Sets the terminal geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if the `TIOCSWINSZ` ioctl fails.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let size = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // SAFETY: the master fd is owned by self and stays open for the call;
        // `size` is a valid winsize living on the stack for the call.
        let _ = unsafe { set_winsize(self.master.as_raw_fd(), &raw const size) }
            .map_err(|e| DriverError::syscall("ioctl(TIOCSWINSZ)", e))?;
        Ok(())
    }

    /// Opens an independent handle on the master for one copy direction.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be duplicated.
    pub fn master_file(&self) -> Result<File> {
        self.master
            .try_clone()
            .map(File::from)
            .map_err(|e| DriverError::io("/dev/ptmx", e))
    }
}
