//! Container removal.

use super::{remove_dir_if_exists, ContainerService};
use crate::engine::DeleteOptions;
use crate::error::{Error, Result};

impl ContainerService {
    /// Removes a container and everything it owns.
    ///
    /// Deletes the engine object (with its snapshot), closes the I/O
    /// bundle, drops the status checkpoint and root directory, unregisters
    /// the container and releases its name. Once the engine delete has
    /// succeeded, local cleanup failures are logged and removal still
    /// completes. Removing an unknown container succeeds.
    pub async fn remove_container(&self, id: &str) -> Result<()> {
        let container = match self.containers.get(id) {
            Ok(container) => container,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let id = container.metadata().id.clone();

        container.status_storage().update(|status| {
            if status.removing {
                return Err(Error::InvalidState {
                    id: id.clone(),
                    state: "removing".to_string(),
                    expected: "not removing".to_string(),
                });
            }
            status.removing = true;
            Ok(())
        })?;

        if let Err(e) = self
            .engine
            .delete_container(
                container.handle(),
                DeleteOptions {
                    cleanup_snapshot: true,
                },
            )
            .await
        {
            // Leave the container registered so removal can be retried.
            if let Err(reset) = container.status_storage().update(|status| {
                status.removing = false;
                Ok(())
            }) {
                tracing::warn!(container = %id, error = %reset, "Failed to reset removing flag");
            }
            return Err(e);
        }

        // The engine object is gone; local leftovers must not block
        // unregistering the container.
        if let Err(e) = container.io().close() {
            tracing::warn!(container = %id, error = %e, "Failed to close container io");
        }
        if let Err(e) = container.status_storage().delete() {
            tracing::warn!(container = %id, error = %e, "Failed to remove status checkpoint");
        }
        let root = self.config.container_root_dir(&id);
        if let Err(e) = remove_dir_if_exists(&root) {
            tracing::warn!(
                container = %id,
                root = %root.display(),
                error = %e,
                "Failed to remove container root"
            );
        }

        self.containers.delete(&id)?;
        self.container_names.release_by_key(&id)?;
        tracing::info!(container = %id, name = %container.name(), "Container removed");
        Ok(())
    }
}
