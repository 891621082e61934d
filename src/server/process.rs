//! Start, exec, attach and port-forward.

use super::naming::generate_id;
use super::ContainerService;
use crate::engine::{ExecProcess, ProcessHandle};
use crate::error::{Error, Result};
use crate::io::{BoxedStream, ProcessIo};
use crate::store::{Container, ContainerState};
use crate::streaming::{handle_resizing, TerminalSize};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Exit code recorded when the task could not be started.
const START_FAILURE_EXIT_CODE: i32 = 128;

impl ContainerService {
    /// Starts a created container's main task.
    ///
    /// The created-state check and the move to starting happen under the
    /// status lock, so concurrent starts of one container start it once.
    pub async fn start_container(&self, id: &str) -> Result<()> {
        let container = self.containers.get(id)?;
        let container_id = container.metadata().id.clone();
        container.status_storage().update(|status| {
            let state = if status.removing {
                "removing".to_string()
            } else if status.starting {
                "starting".to_string()
            } else if status.state() != ContainerState::Created {
                status.state().to_string()
            } else {
                status.starting = true;
                return Ok(());
            };
            Err(Error::InvalidState {
                id: container_id.clone(),
                state,
                expected: ContainerState::Created.to_string(),
            })
        })?;

        // Output FIFOs need a reader before the engine opens their write ends.
        let started = match container.io().open_outputs() {
            Ok(()) => {
                self.engine
                    .start_task(container.handle(), container.io().fifos())
                    .await
            }
            Err(e) => Err(e),
        };

        let pid = match started {
            Ok(pid) => pid,
            Err(e) => {
                let message = e.to_string();
                container.status_storage().update(|status| {
                    status.starting = false;
                    status.finished_at = Some(Utc::now());
                    status.exit_code = START_FAILURE_EXIT_CODE;
                    status.reason = "StartError".to_string();
                    status.message = message;
                    Ok(())
                })?;
                return Err(e);
            }
        };

        let pumps = container.io().start();
        container.status_storage().update(|status| {
            status.starting = false;
            status.pid = pid;
            status.started_at = Some(Utc::now());
            Ok(())
        })?;
        pumps?;
        tracing::info!(container = %container_id, pid, "Container started");
        Ok(())
    }

    /// Records the exit of a container's main task.
    pub fn handle_task_exit(&self, id: &str, exit_code: i32) -> Result<()> {
        let container = self.containers.get(id)?;
        container.status_storage().update(|status| {
            if status.finished_at.is_some() {
                return Ok(());
            }
            status.pid = 0;
            status.finished_at = Some(Utc::now());
            status.exit_code = exit_code;
            status.reason = if exit_code == 0 { "Completed" } else { "Error" }.to_string();
            Ok(())
        })?;
        tracing::info!(container = %container.metadata().id, exit_code, "Container exited");
        Ok(())
    }

    /// Runs `cmd` inside a running container and returns its exit code.
    ///
    /// Terminal resizes from `resize` are applied for the lifetime of the
    /// process when `io.tty` is set.
    pub async fn exec_in_container(
        &self,
        id: &str,
        cmd: Vec<String>,
        io: ProcessIo,
        resize: Option<mpsc::Receiver<TerminalSize>>,
    ) -> Result<i32> {
        if cmd.is_empty() {
            return Err(Error::NoCommandSpecified);
        }
        let container = self.containers.get(id)?;
        expect_state(&container, ContainerState::Running)?;

        let exec_id = generate_id();
        let tty = io.tty;
        let process: Arc<dyn ProcessHandle> = Arc::from(
            self.engine
                .exec(
                    container.handle(),
                    &exec_id,
                    ExecProcess {
                        args: cmd,
                        terminal: tty,
                        ..ExecProcess::default()
                    },
                    io,
                )
                .await?,
        );
        tracing::debug!(
            container = %container.metadata().id,
            exec = %exec_id,
            pid = process.pid(),
            "Exec process started"
        );

        let resizer = resize.filter(|_| tty).map(|rx| {
            let process = process.clone();
            handle_resizing(rx, move |size| {
                let process = process.clone();
                async move { process.resize(size).await }
            })
        });

        let exit_code = process.wait().await;
        if let Some(task) = resizer {
            task.abort();
        }
        let exit_code = exit_code?;
        tracing::debug!(container = %container.metadata().id, exec = %exec_id, exit_code, "Exec process exited");
        Ok(exit_code)
    }

    /// Connects caller stdio to a running container's main process.
    pub async fn attach_container(
        &self,
        id: &str,
        mut io: ProcessIo,
        resize: Option<mpsc::Receiver<TerminalSize>>,
    ) -> Result<()> {
        let container = self.containers.get(id)?;
        expect_state(&container, ContainerState::Running)?;

        if io.stdin.is_some() && !container.metadata().config.stdin {
            tracing::debug!(container = %container.metadata().id, "Container has no stdin, ignoring attach stdin");
            io.stdin = None;
        }

        let resizer = resize.filter(|_| io.tty).map(|rx| {
            let engine = self.engine.clone();
            let handle = container.handle().clone();
            handle_resizing(rx, move |size| {
                let engine = engine.clone();
                let handle = handle.clone();
                async move { engine.resize_task(&handle, size).await }
            })
        });

        let result = container.io().attach(io).await;
        if let Some(task) = resizer {
            task.abort();
        }
        result
    }

    /// Forwards `stream` to `port` in a sandbox's network namespace.
    pub async fn port_forward(&self, sandbox_id: &str, port: u16, stream: BoxedStream) -> Result<()> {
        if port == 0 {
            return Err(Error::InvalidPort(0));
        }
        let sandbox = self.sandboxes.get(sandbox_id)?;
        let pid = self.engine.task_pid(sandbox.handle()).await?;
        tracing::debug!(sandbox = %sandbox.metadata().id, pid, port, "Port forward");
        self.engine.port_forward(pid, port, stream).await
    }
}

fn expect_state(container: &Container, expected: ContainerState) -> Result<()> {
    let state = container.status()?.state();
    if state != expected {
        return Err(Error::InvalidState {
            id: container.metadata().id.clone(),
            state: state.to_string(),
            expected: expected.to_string(),
        });
    }
    Ok(())
}
