//! Rebuilding registry entries from engine objects after a restart.

use super::create::IO_DIR;
use super::ContainerService;
use crate::constants::{CONTAINER_METADATA_EXTENSION, STATUS_FILE};
use crate::engine::EngineHandle;
use crate::error::{Error, Result};
use crate::io::ContainerIo;
use crate::store::{Container, ContainerMetadata, ContainerState, Status, StatusStorage};
use std::sync::Arc;

impl ContainerService {
    /// Rebuilds a container entry from the metadata stored on its engine
    /// object and returns its ID.
    ///
    /// The container's sandbox must already be registered. A missing or
    /// unreadable status checkpoint yields a container in the unknown
    /// state. Output fan-out resumes for a container recorded as running.
    pub async fn recover_container(&self, handle: EngineHandle) -> Result<String> {
        let value = self
            .engine
            .extension(&handle, CONTAINER_METADATA_EXTENSION)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("container metadata on engine object {}", handle.id()))
            })?;
        let metadata: ContainerMetadata = serde_json::from_value(value)?;
        let id = metadata.id.clone();
        let name = metadata.name.clone();

        self.sandboxes.get(&metadata.sandbox_id)?;
        if self.containers.get(&id).is_ok_and(|c| c.metadata().id == id) {
            return Err(Error::AlreadyExists(id));
        }
        self.container_names.reserve(&name, &id)?;

        match self.load_container(metadata, handle) {
            Ok(state) => {
                tracing::info!(container = %id, name = %name, %state, "Container recovered");
                Ok(id)
            }
            Err(e) => {
                self.container_names.release_by_name(&name)?;
                Err(e)
            }
        }
    }

    fn load_container(
        &self,
        metadata: ContainerMetadata,
        handle: EngineHandle,
    ) -> Result<ContainerState> {
        let root = self.config.container_root_dir(&metadata.id);
        let status_path = root.join(STATUS_FILE);
        let status = match StatusStorage::load(&status_path) {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    container = %metadata.id,
                    error = %e,
                    "Failed to load status checkpoint, container state unknown"
                );
                StatusStorage::create(&status_path, Status::unknown(e.to_string()))?
            }
        };

        // Starting and removing do not survive a restart.
        let current = status.get()?;
        if current.starting || current.removing {
            status.update(|s| {
                s.starting = false;
                s.removing = false;
                Ok(())
            })?;
        }

        let io = Arc::new(ContainerIo::recover(
            &metadata.id,
            &root.join(IO_DIR),
            metadata.config.stdin,
            metadata.config.tty,
        )?);
        let state = current.state();
        if state == ContainerState::Running {
            io.start()?;
        }

        self.containers.add(Container::new(metadata, status, handle, io))?;
        Ok(state)
    }
}
