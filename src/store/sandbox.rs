//! Sandbox entity.

use super::Entity;
use crate::engine::EngineHandle;
use crate::manifest::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Immutable identity of a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxMetadata {
    pub id: String,
    pub name: String,
    pub config: SandboxConfig,
    /// Network namespace path, empty under host networking.
    pub netns_path: Option<PathBuf>,
}

/// A registered sandbox.
#[derive(Debug, Clone)]
pub struct Sandbox {
    metadata: Arc<SandboxMetadata>,
    handle: EngineHandle,
}

impl Sandbox {
    pub fn new(metadata: SandboxMetadata, handle: EngineHandle) -> Self {
        Self {
            metadata: Arc::new(metadata),
            handle,
        }
    }

    pub fn metadata(&self) -> &SandboxMetadata {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.metadata.config
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }
}

impl Entity for Sandbox {
    fn id(&self) -> &str {
        &self.metadata.id
    }
}
