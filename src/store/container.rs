//! Container entity.

use super::status::{Status, StatusStorage};
use super::Entity;
use crate::engine::EngineHandle;
use crate::error::Result;
use crate::io::ContainerIo;
use crate::manifest::ContainerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Immutable identity of a container.
///
/// Serialized onto the engine object as extension metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Full 64-hex-character ID.
    pub id: String,
    /// Derived unique name.
    pub name: String,
    pub sandbox_id: String,
    pub config: ContainerConfig,
    /// Resolved image ID.
    pub image_ref: String,
    /// Absolute log path, when the sandbox has a log directory.
    pub log_path: Option<PathBuf>,
}

/// A registered container.
///
/// Clones share status and I/O.
#[derive(Debug, Clone)]
pub struct Container {
    metadata: Arc<ContainerMetadata>,
    status: Arc<StatusStorage>,
    handle: EngineHandle,
    io: Arc<ContainerIo>,
}

impl Container {
    pub fn new(
        metadata: ContainerMetadata,
        status: StatusStorage,
        handle: EngineHandle,
        io: Arc<ContainerIo>,
    ) -> Self {
        Self {
            metadata: Arc::new(metadata),
            status: Arc::new(status),
            handle,
            io,
        }
    }

    pub fn metadata(&self) -> &ContainerMetadata {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn sandbox_id(&self) -> &str {
        &self.metadata.sandbox_id
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> Result<Status> {
        self.status.get()
    }

    /// Checkpointed status storage.
    pub fn status_storage(&self) -> &StatusStorage {
        &self.status
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    pub fn io(&self) -> &Arc<ContainerIo> {
        &self.io
    }
}

impl Entity for Container {
    fn id(&self) -> &str {
        &self.metadata.id
    }
}
