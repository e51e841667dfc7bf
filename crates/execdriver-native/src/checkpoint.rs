//! Checkpointing a running container to its image directory.

use std::os::unix::fs::DirBuilderExt;

use execdriver_common::error::{DriverError, Result};
use execdriver_common::types::ContainerId;

use crate::driver::Driver;
use crate::state;

impl Driver {
    /// Dumps an active container into its checkpoint image directory.
    ///
    /// The metadata files are copied in first: the container's own copies
    /// disappear once the engine stops the process. An existing image is
    /// overwritten. The registry stays locked while the engine runs so no
    /// Kill or Terminate races the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if `id` is not active, an I/O error
    /// if the image directory or metadata cannot be written, or the engine's
    /// error verbatim.
    pub fn checkpoint(&self, id: &ContainerId) -> Result<()> {
        let _ = self.registry.lookup(id)?;

        let image_dir = self.checkpoint_image_dir(id);
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&image_dir)
            .map_err(|e| DriverError::io(&image_dir, e))?;
        state::copy_metadata(&self.registry.state_dir(id), &image_dir)?;

        self.registry.with_entry(id, |entry| {
            let pid = entry.init_pid()?;
            tracing::debug!(id = %id, pid, image_dir = %image_dir.display(), "checkpointing");
            self.engine
                .checkpoint(entry.container().as_ref(), &image_dir, pid)
        })?;
        tracing::info!(id = %id, image_dir = %image_dir.display(), "container checkpointed");
        Ok(())
    }
}
