//! # Container Service
//!
//! Orchestrates the container lifecycle on top of an [`ExecutionEngine`].
//!
//! ## Creation Saga
//!
//! ```text
//!  reserve name ─► resolve image ─► container root ─► volumes + implicit mounts
//!       │                                                       │
//!       ▼                                                       ▼
//!  register ◄── status checkpoint ◄── engine create ◄── FIFOs ◄── compile spec
//! ```
//!
//! Every committed step records its compensation; a failure anywhere runs
//! them newest-first before the error is returned, so a failed create
//! leaves no name reservation, directory, FIFO or engine object behind.
//! Cancelling a create (dropping its future) triggers the same undo.
//!
//! ## Concurrency
//!
//! Name reservation is the only admission point: two concurrent creates
//! with the same derived name race on [`NameIndex::reserve`] and exactly
//! one proceeds. No store lock is held across an engine call.

mod create;
pub mod naming;
mod process;
mod recover;
mod remove;
mod rollback;

use crate::config::ShimConfig;
use crate::constants::{
    CONTAINERS_DIR, ETC_HOSTS, RESOLV_CONF_PATH, SANDBOXES_DIR, SANDBOX_HOSTS_FILE,
    SANDBOX_RESOLV_FILE, SANDBOX_SHM_DIR,
};
use crate::engine::{EngineHandle, ExecutionEngine};
use crate::error::{Error, Result};
use crate::image::ImageStore;
use crate::manifest::SandboxConfig;
use crate::spec::{HostOs, SpecCompiler};
use crate::store::{
    Container, EntityStore, NameIndex, Sandbox, SandboxMetadata, Status,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Hosts file written for sandboxes when the host has none.
const DEFAULT_HOSTS: &str = "127.0.0.1\tlocalhost\n::1\tlocalhost ip6-localhost ip6-loopback\n";

/// Container lifecycle service.
pub struct ContainerService {
    config: ShimConfig,
    engine: Arc<dyn ExecutionEngine>,
    images: Arc<ImageStore>,
    compiler: SpecCompiler,
    sandboxes: EntityStore<Sandbox>,
    containers: EntityStore<Container>,
    sandbox_names: NameIndex,
    container_names: Arc<NameIndex>,
}

impl ContainerService {
    /// Creates the service and its root directory layout.
    pub fn new(
        config: ShimConfig,
        engine: Arc<dyn ExecutionEngine>,
        images: Arc<ImageStore>,
        host: Arc<dyn HostOs>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(config.root_dir.join(CONTAINERS_DIR))?;
        std::fs::create_dir_all(config.root_dir.join(SANDBOXES_DIR))?;

        tracing::info!(
            root = %config.root_dir.display(),
            engine = engine.name(),
            snapshotter = %config.snapshotter,
            "Container service initialized"
        );

        let compiler = SpecCompiler::new(host, &config);
        Ok(Self {
            config,
            engine,
            images,
            compiler,
            sandboxes: EntityStore::new(),
            containers: EntityStore::new(),
            sandbox_names: NameIndex::new(),
            container_names: Arc::new(NameIndex::new()),
        })
    }

    pub fn config(&self) -> &ShimConfig {
        &self.config
    }

    pub fn images(&self) -> &Arc<ImageStore> {
        &self.images
    }

    pub fn engine(&self) -> &Arc<dyn ExecutionEngine> {
        &self.engine
    }

    // =========================================================================
    // Sandboxes
    // =========================================================================

    /// Registers a running sandbox whose engine object already exists.
    ///
    /// Prepares the sandbox root (hosts, resolv.conf and shm directory)
    /// that container implicit mounts point at. Returns the new sandbox ID.
    pub fn add_sandbox(
        &self,
        config: SandboxConfig,
        handle: EngineHandle,
        netns_path: Option<PathBuf>,
    ) -> Result<String> {
        let id = naming::generate_id();
        let name = naming::make_sandbox_name(&config);
        self.sandbox_names.reserve(&name, &id)?;

        let root = self.config.sandbox_root_dir(&id);
        let registered = prepare_sandbox_root(&root).and_then(|()| {
            self.sandboxes.add(Sandbox::new(
                SandboxMetadata {
                    id: id.clone(),
                    name: name.clone(),
                    config,
                    netns_path,
                },
                handle,
            ))
        });

        if let Err(e) = registered {
            if let Err(cleanup) = remove_dir_if_exists(&root) {
                tracing::warn!(sandbox = %id, error = %cleanup, "Failed to remove sandbox root");
            }
            self.sandbox_names.release_by_name(&name)?;
            return Err(e);
        }

        tracing::info!(sandbox = %id, name = %name, "Sandbox registered");
        Ok(id)
    }

    /// Re-registers a sandbox from a previous run under its original ID.
    ///
    /// Missing sandbox root files are recreated; existing ones are kept.
    pub fn recover_sandbox(&self, metadata: SandboxMetadata, handle: EngineHandle) -> Result<()> {
        let id = metadata.id.clone();
        let name = metadata.name.clone();
        if self.sandboxes.get(&id).is_ok_and(|s| s.metadata().id == id) {
            return Err(Error::AlreadyExists(id));
        }
        self.sandbox_names.reserve(&name, &id)?;

        let root = self.config.sandbox_root_dir(&id);
        let registered = if root.exists() {
            Ok(())
        } else {
            prepare_sandbox_root(&root)
        }
        .and_then(|()| self.sandboxes.add(Sandbox::new(metadata, handle)));

        if let Err(e) = registered {
            self.sandbox_names.release_by_name(&name)?;
            return Err(e);
        }
        tracing::info!(sandbox = %id, name = %name, "Sandbox recovered");
        Ok(())
    }

    /// Unregisters a sandbox. Unknown IDs succeed.
    ///
    /// Fails while containers of the sandbox are still registered.
    pub fn remove_sandbox(&self, id: &str) -> Result<()> {
        let sandbox = match self.sandboxes.get(id) {
            Ok(sandbox) => sandbox,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let id = sandbox.metadata().id.clone();

        let remaining = self
            .containers
            .list()?
            .iter()
            .filter(|c| c.sandbox_id() == id)
            .count();
        if remaining > 0 {
            return Err(Error::InvalidState {
                id,
                state: format!("{remaining} containers"),
                expected: "no containers".to_string(),
            });
        }

        remove_dir_if_exists(&self.config.sandbox_root_dir(&id))?;
        self.sandboxes.delete(&id)?;
        self.sandbox_names.release_by_key(&id)?;
        tracing::info!(sandbox = %id, "Sandbox removed");
        Ok(())
    }

    /// Looks up a sandbox by ID or unique prefix.
    pub fn sandbox(&self, id: &str) -> Result<Sandbox> {
        self.sandboxes.get(id)
    }

    pub fn list_sandboxes(&self) -> Result<Vec<Sandbox>> {
        self.sandboxes.list()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Looks up a container by ID or unique prefix.
    pub fn container(&self, id: &str) -> Result<Container> {
        self.containers.get(id)
    }

    /// Lists containers, optionally only those of one sandbox.
    pub fn list_containers(&self, sandbox_id: Option<&str>) -> Result<Vec<Container>> {
        let sandbox_id = match sandbox_id {
            Some(prefix) => Some(self.sandboxes.get(prefix)?.metadata().id.clone()),
            None => None,
        };
        let mut containers: Vec<Container> = self
            .containers
            .list()?
            .into_iter()
            .filter(|c| sandbox_id.as_deref().map_or(true, |s| c.sandbox_id() == s))
            .collect();
        containers.sort_by(|a, b| a.metadata().id.cmp(&b.metadata().id));
        Ok(containers)
    }

    /// Current status of a container.
    pub fn container_status(&self, id: &str) -> Result<Status> {
        self.containers.get(id)?.status()
    }
}

impl std::fmt::Debug for ContainerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerService")
            .field("root_dir", &self.config.root_dir)
            .field("engine", &self.engine.name())
            .field("compiler", &self.compiler)
            .finish_non_exhaustive()
    }
}

fn prepare_sandbox_root(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root.join(SANDBOX_SHM_DIR))?;
    copy_or_write(Path::new(ETC_HOSTS), &root.join(SANDBOX_HOSTS_FILE), DEFAULT_HOSTS)?;
    copy_or_write(Path::new(RESOLV_CONF_PATH), &root.join(SANDBOX_RESOLV_FILE), "")?;
    Ok(())
}

/// Copies the host file, or writes `fallback` when the host has none.
fn copy_or_write(host: &Path, target: &Path, fallback: &str) -> Result<()> {
    match std::fs::copy(host, target) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::write(target, fallback)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
