//! Container creation saga.

use super::naming::{generate_id, make_container_name};
use super::rollback::{Compensation, Rollback};
use super::ContainerService;
use crate::constants::{
    CONTAINER_KIND_CONTAINER, CONTAINER_KIND_LABEL, CONTAINER_METADATA_EXTENSION, DEV_SHM,
    ETC_HOSTS, RESOLV_CONF_PATH, SANDBOX_HOSTS_FILE, SANDBOX_RESOLV_FILE, SANDBOX_SHM_DIR,
    STATUS_FILE, VOLUMES_DIR,
};
use crate::engine::CreateContainerRequest;
use crate::error::{Error, Result};
use crate::image::ImageConfig;
use crate::io::ContainerIo;
use crate::manifest::{ContainerConfig, Mount};
use crate::spec::CompileInput;
use crate::store::{Container, ContainerMetadata, Sandbox, Status, StatusStorage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Subdirectory of a container root holding its FIFOs.
pub(super) const IO_DIR: &str = "io";

impl ContainerService {
    /// Creates a container in a running sandbox and returns its ID.
    ///
    /// `sandbox_id` may be a unique prefix. The image must already be
    /// present in the local image store. On failure every step already
    /// committed is undone before the error is returned. If the returned
    /// future is dropped before it completes, the same undo runs on a
    /// spawned task.
    pub async fn create_container(&self, sandbox_id: &str, config: ContainerConfig) -> Result<String> {
        let sandbox = self.sandboxes.get(sandbox_id)?;

        let id = generate_id();
        let name = make_container_name(&config, sandbox.config());
        tracing::debug!(container = %id, name = %name, "Generated container id");
        self.container_names.reserve(&name, &id)?;

        let mut rollback = Rollback::new(&id, self.container_names.clone(), self.engine.clone());
        rollback.push(Compensation::ReleaseName(name.clone()));

        match self.create_steps(&id, &name, &sandbox, config, &mut rollback).await {
            Ok(()) => {
                rollback.commit();
                tracing::info!(
                    container = %id,
                    name = %name,
                    sandbox = %sandbox.metadata().id,
                    "Container created"
                );
                Ok(id)
            }
            Err(e) => {
                tracing::debug!(container = %id, error = %e, "Container creation failed, rolling back");
                rollback.run().await;
                Err(e)
            }
        }
    }

    async fn create_steps(
        &self,
        id: &str,
        name: &str,
        sandbox: &Sandbox,
        config: ContainerConfig,
        rollback: &mut Rollback,
    ) -> Result<()> {
        let sandbox_id = sandbox.metadata().id.as_str();
        let sandbox_pid = self.engine.task_pid(sandbox.handle()).await?;

        let image = self
            .images
            .resolve(&config.image)?
            .ok_or_else(|| Error::ImageNotFound(config.image.clone()))?;

        let root = self.config.container_root_dir(id);
        std::fs::create_dir_all(&root)?;
        rollback.push(Compensation::RemoveDir(root.clone()));

        let volumes = image_volume_mounts(&root, &image.config, &config.mounts);
        let implicit = implicit_mounts(
            &self.config.sandbox_root_dir(sandbox_id),
            &config,
            &volumes,
        );
        let extra_mounts: Vec<Mount> = implicit.into_iter().chain(volumes).collect();

        let spec = self
            .compiler
            .compile(&CompileInput {
                id,
                sandbox_id,
                sandbox_pid,
                sandbox_netns: sandbox.metadata().netns_path.as_deref(),
                config: &config,
                sandbox_config: sandbox.config(),
                image: &image.config,
                extra_mounts: &extra_mounts,
            })
            .map_err(|e| Error::SpecGeneration {
                id: id.to_string(),
                source: Box::new(e),
            })?;

        let io = Arc::new(ContainerIo::create(id, &root.join(IO_DIR), config.stdin, config.tty)?);
        rollback.push(Compensation::CloseIo(io.clone()));

        let log_path = container_log_path(&sandbox.config().log_directory, &config.log_path);
        let metadata = ContainerMetadata {
            id: id.to_string(),
            name: name.to_string(),
            sandbox_id: sandbox_id.to_string(),
            config,
            image_ref: image.id.clone(),
            log_path,
        };

        let mut labels = metadata.config.labels.clone();
        labels.insert(
            CONTAINER_KIND_LABEL.to_string(),
            CONTAINER_KIND_CONTAINER.to_string(),
        );
        let mut extensions = HashMap::new();
        extensions.insert(
            CONTAINER_METADATA_EXTENSION.to_string(),
            serde_json::to_value(&metadata)?,
        );

        let handle = self
            .engine
            .create_container(CreateContainerRequest {
                id: id.to_string(),
                snapshotter: self.config.snapshotter.clone(),
                image: image.id.clone(),
                spec,
                runtime: self.config.runtime.clone(),
                labels,
                extensions,
            })
            .await?;
        rollback.push(Compensation::DeleteEngineContainer(handle.clone()));

        let status_path = root.join(STATUS_FILE);
        let status = StatusStorage::create(&status_path, Status::created())?;
        rollback.push(Compensation::RemoveStatus(status_path));

        self.containers
            .add(Container::new(metadata, status, handle, io))
            .map_err(|e| Error::StoreInsertion {
                id: id.to_string(),
                source: Box::new(e),
            })
    }
}

/// Mounts for image-declared volumes the caller did not mount explicitly.
///
/// Each volume gets a fresh directory under `<container root>/volumes`.
pub(crate) fn image_volume_mounts(
    container_root: &Path,
    image: &ImageConfig,
    caller: &[Mount],
) -> Vec<Mount> {
    image
        .volumes
        .keys()
        .filter(|dst| !is_mounted(dst, caller))
        .map(|dst| {
            let src = container_root.join(VOLUMES_DIR).join(generate_id());
            tracing::debug!(destination = %dst, source = %src.display(), "Adding image volume");
            Mount::bind(src.to_string_lossy(), dst.as_str())
        })
        .collect()
}

/// `/etc/hosts`, `/etc/resolv.conf` and `/dev/shm`, unless already mounted.
pub(crate) fn implicit_mounts(
    sandbox_root: &Path,
    config: &ContainerConfig,
    volumes: &[Mount],
) -> Vec<Mount> {
    let security = config.security_context();
    let covered = |dst: &str| is_mounted(dst, &config.mounts) || is_mounted(dst, volumes);
    let mut mounts = Vec::new();

    for (dst, file) in [
        (ETC_HOSTS, SANDBOX_HOSTS_FILE),
        (RESOLV_CONF_PATH, SANDBOX_RESOLV_FILE),
    ] {
        if !covered(dst) {
            let mut mount = Mount::bind(sandbox_root.join(file).to_string_lossy(), dst);
            mount.readonly = security.readonly_rootfs;
            mounts.push(mount);
        }
    }

    if !covered(DEV_SHM) {
        let src = if security.namespace_options.host_ipc {
            PathBuf::from(DEV_SHM)
        } else {
            sandbox_root.join(SANDBOX_SHM_DIR)
        };
        mounts.push(Mount::bind(src.to_string_lossy(), DEV_SHM));
    }
    mounts
}

fn is_mounted(dst: &str, mounts: &[Mount]) -> bool {
    let dst = Path::new(dst);
    mounts
        .iter()
        .any(|m| Path::new(&m.container_path) == dst)
}

fn container_log_path(log_directory: &str, log_path: &str) -> Option<PathBuf> {
    (!log_path.is_empty()).then(|| Path::new(log_directory).join(log_path))
}
