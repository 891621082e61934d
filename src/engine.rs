//! Execution engine trait - the low-level container backend.
//!
//! The shim never runs processes itself. Everything that touches a real
//! container goes through [`ExecutionEngine`]: creating the container
//! object from a compiled spec, starting its task, exec'ing extra
//! processes, resizing terminals and tearing it down.
//!
//! # Lifecycle
//!
//! ```text
//! create_container(spec) → start_task(fifos) → [exec(...)] → delete_container()
//! ```
//!
//! # Extension Metadata
//!
//! Engines keep an opaque key/value map on each container object. The
//! shim attaches its own [`ContainerMetadata`] there at creation (the
//! request's `extensions`) and reads it back when recovering, so the
//! engine object alone is enough to rebuild the registry entry.
//!
//! [`ContainerMetadata`]: crate::store::ContainerMetadata

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::io::{BoxedStream, FifoSet, ProcessIo};
use crate::spec::OciSpec;
use crate::streaming::TerminalSize;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Handles
// =============================================================================

/// Opaque reference to a container object inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineHandle {
    id: String,
}

impl EngineHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Engine-side container ID.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Everything the engine needs to create a container object.
#[derive(Debug, Clone)]
pub struct CreateContainerRequest {
    pub id: String,
    /// Snapshotter preparing the rootfs.
    pub snapshotter: String,
    /// Resolved image ID.
    pub image: String,
    pub spec: OciSpec,
    pub runtime: RuntimeConfig,
    pub labels: HashMap<String, String>,
    /// Extension metadata attached to the engine object.
    pub extensions: HashMap<String, serde_json::Value>,
}

/// Options for deleting a container object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Also remove the rootfs snapshot.
    pub cleanup_snapshot: bool,
}

/// Process launched by [`ExecutionEngine::exec`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecProcess {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub terminal: bool,
}

/// A process started inside a running container.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Host PID of the process.
    fn pid(&self) -> u32;

    /// Resizes the process terminal.
    async fn resize(&self, size: TerminalSize) -> Result<()>;

    /// Waits for the process to exit and returns its exit code.
    async fn wait(&self) -> Result<i32>;
}

// =============================================================================
// Execution Engine Trait
// =============================================================================

/// Low-level container backend.
///
/// # Implementations
///
/// Real deployments wrap a containerd-style daemon client. Tests use an
/// in-memory fake.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Returns the engine name.
    fn name(&self) -> &str;

    // =========================================================================
    // Container Objects
    // =========================================================================

    /// Creates a container object (not started).
    async fn create_container(&self, request: CreateContainerRequest) -> Result<EngineHandle>;

    /// Deletes a container object. Deleting an unknown handle succeeds.
    async fn delete_container(&self, handle: &EngineHandle, opts: DeleteOptions) -> Result<()>;

    /// Reads one extension metadata entry.
    async fn extension(&self, handle: &EngineHandle, key: &str)
        -> Result<Option<serde_json::Value>>;

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Starts the container's task wired to `fifos`. Returns its PID.
    async fn start_task(&self, handle: &EngineHandle, fifos: &FifoSet) -> Result<u32>;

    /// Returns the PID of the container's running task.
    async fn task_pid(&self, handle: &EngineHandle) -> Result<u32>;

    /// Resizes the terminal of the container's main task.
    async fn resize_task(&self, handle: &EngineHandle, size: TerminalSize) -> Result<()> {
        let _ = (handle, size);
        Err(Error::NotSupported(format!(
            "resize not supported by {} engine",
            self.name()
        )))
    }

    // =========================================================================
    // Optional Operations
    // =========================================================================

    /// Starts an extra process inside a running container.
    async fn exec(
        &self,
        handle: &EngineHandle,
        exec_id: &str,
        process: ExecProcess,
        io: ProcessIo,
    ) -> Result<Box<dyn ProcessHandle>> {
        let _ = (handle, exec_id, process, io);
        Err(Error::NotSupported(format!(
            "exec not supported by {} engine",
            self.name()
        )))
    }

    /// Connects `stream` to `port` inside the network namespace of `pid`.
    ///
    /// Returns when either side closes.
    async fn port_forward(&self, pid: u32, port: u16, stream: BoxedStream) -> Result<()> {
        let _ = (pid, port, stream);
        Err(Error::NotSupported(format!(
            "port forward not supported by {} engine",
            self.name()
        )))
    }
}
