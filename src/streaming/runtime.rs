//! Adapter between streaming sessions and the container service.

use super::protocol::TerminalSize;
use crate::error::{Error, Result};
use crate::io::{BoxedStream, ProcessIo};
use crate::server::ContainerService;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Exec, attach and port-forward entry points used by stream servers.
#[derive(Clone)]
pub struct StreamRuntime {
    service: Arc<ContainerService>,
}

impl StreamRuntime {
    pub fn new(service: Arc<ContainerService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<ContainerService> {
        &self.service
    }

    /// Runs `cmd` in a container. A non-zero exit is an error.
    pub async fn exec(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        io: ProcessIo,
        resize: Option<mpsc::Receiver<TerminalSize>>,
    ) -> Result<()> {
        let code = self
            .service
            .exec_in_container(container_id, cmd, io, resize)
            .await?;
        if code != 0 {
            return Err(Error::NonZeroExit { code });
        }
        Ok(())
    }

    /// Attaches to a container's main process.
    pub async fn attach(
        &self,
        container_id: &str,
        io: ProcessIo,
        resize: Option<mpsc::Receiver<TerminalSize>>,
    ) -> Result<()> {
        self.service.attach_container(container_id, io, resize).await
    }

    /// Forwards `stream` to `port` in a sandbox's network namespace.
    pub async fn port_forward(&self, sandbox_id: &str, port: i64, stream: BoxedStream) -> Result<()> {
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(Error::InvalidPort(port))?;
        self.service.port_forward(sandbox_id, port, stream).await
    }
}

impl std::fmt::Debug for StreamRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRuntime").finish_non_exhaustive()
    }
}
