//! # magikcri
//!
//! **Container Runtime Shim**
//!
//! This crate sits between a container-lifecycle API and a low-level
//! execution engine. It keeps the registry of live sandboxes and
//! containers, compiles declarative container configs into complete OCI
//! runtime specs, and multiplexes interactive exec/attach/port-forward I/O
//! over a single connection.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            magikcri                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                   ContainerService                          │    │
//! │  │  create (saga) → start → exec / attach → remove             │    │
//! │  └───────┬──────────────────────┬─────────────────────┬────────┘    │
//! │          │                      │                     │             │
//! │  ┌───────▼────────┐   ┌─────────▼─────────┐   ┌───────▼────────┐    │
//! │  │  EntityStore   │   │   SpecCompiler    │   │ ExecutionEngine│    │
//! │  │ prefix lookup  │   │ mounts │ security │   │  (trait)       │    │
//! │  │ name reserve   │   │ devices│ cgroups  │   │                │    │
//! │  └────────────────┘   └───────────────────┘   └────────────────┘    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                          Streaming                                  │
//! │  StreamNegotiator (v4 → v1) → StreamSession ⇄ accept_streams        │
//! │  error │ stdin │ stdout │ stderr │ resize        port-forward pairs │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Container Lifecycle
//!
//! ```text
//!   ┌─────────┐   create   ┌─────────┐   start   ┌─────────┐  task exit  ┌────────┐
//!   │ (none)  │ ─────────► │ Created │ ────────► │ Running │ ──────────► │ Exited │
//!   └─────────┘            └────┬────┘           └────┬────┘             └───┬────┘
//!                               │ remove              │ remove               │ remove
//!                               ▼                     ▼                      ▼
//!                          ┌───────────────────────────────────────────────────┐
//!                          │                     (removed)                     │
//!                          └───────────────────────────────────────────────────┘
//! ```
//!
//! # Security Model
//!
//! - **Seccomp / AppArmor**: kubelet profile names (`runtime/default`,
//!   `localhost/<name>`, `unconfined`) resolved against node support.
//! - **Capabilities**: non-privileged containers start with none; only
//!   requested capabilities are granted.
//! - **Privileged**: all capabilities, all host devices, no masked paths.
//!   Combining it with explicit devices or capability drops is rejected.
//! - **Bounded input**: resize messages, error streams and config
//!   documents have fixed size limits (see [`constants`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use magikcri::{ContainerConfig, ContainerService, ImageStore, RealHost, ShimConfig};
//! use std::sync::Arc;
//!
//! async fn run(engine: Arc<dyn magikcri::ExecutionEngine>) -> magikcri::Result<()> {
//!     let service = ContainerService::new(
//!         ShimConfig::default(),
//!         engine,
//!         Arc::new(ImageStore::new()),
//!         Arc::new(RealHost::new()),
//!     )?;
//!     let id = service
//!         .create_container(&sandbox_id, ContainerConfig::from_yaml(b"name: web\nimage: nginx")?)
//!         .await?;
//!     service.start_container(&id).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod image;
pub mod io;
pub mod manifest;
pub mod server;
pub mod spec;
pub mod store;
pub mod streaming;

// Re-exports
pub use config::{RuntimeConfig, ShimConfig, StreamConfig};
pub use constants::*;
pub use engine::{
    CreateContainerRequest, DeleteOptions, EngineHandle, ExecProcess, ExecutionEngine,
    ProcessHandle,
};
pub use error::{Error, Result};
pub use image::{Image, ImageConfig, ImageStore};
pub use io::{BoxedReader, BoxedStream, BoxedWriter, ContainerIo, FifoSet, ProcessIo};
pub use manifest::{ContainerConfig, Mount, MountPropagation, SandboxConfig};
pub use server::ContainerService;
pub use spec::{HostOs, OciSpec, RealHost, SpecCompiler};
pub use store::{Container, ContainerState, EntityStore, NameIndex, Sandbox, Status};
pub use streaming::{
    ProtocolVersion, StreamNegotiator, StreamOptions, StreamRuntime, StreamSession, TerminalSize,
};
