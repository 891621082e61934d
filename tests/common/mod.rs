//! Shared fixtures for the integration suites.
//!
//! - [`FakeEngine`]: in-memory [`ExecutionEngine`] with failure injection
//! - [`FakeHost`]: [`HostOs`] with a scripted mount table and device set
//! - [`transport`]: sub-stream connection over in-memory duplex pipes

#![allow(dead_code)]

use async_trait::async_trait;
use magikcri::spec::{DeviceType, HostDevice, MountInfo};
use magikcri::streaming::{
    select_protocol, Headers, ProtocolVersion, StreamAcceptor, StreamConnection, Upgrader,
};
use magikcri::{
    BoxedStream, ContainerService, CreateContainerRequest, DeleteOptions, EngineHandle, Error,
    ExecProcess, ExecutionEngine, FifoSet, HostOs, Image, ImageConfig, ImageStore, ProcessHandle,
    ProcessIo, Result, SandboxConfig, ShimConfig, TerminalSize,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::sync::{mpsc, oneshot};

pub const TEST_IMAGE: &str = "docker.io/library/busybox:latest";

/// PID reported for every sandbox task.
pub const SANDBOX_PID: u32 = 4242;

// =============================================================================
// Fake Engine
// =============================================================================

/// What an exec'd process does before exiting.
#[derive(Debug, Clone, Default)]
pub struct ExecScript {
    /// Written to stdout after stdin has been echoed.
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

/// In-memory execution engine.
#[derive(Default)]
pub struct FakeEngine {
    pub containers: Mutex<HashMap<String, CreateContainerRequest>>,
    pub deleted: Mutex<Vec<String>>,
    pub started: Mutex<Vec<String>>,
    pub task_resizes: Mutex<Vec<(String, TerminalSize)>>,
    pub exec_resizes: Arc<Mutex<Vec<TerminalSize>>>,
    pub forwards: Mutex<Vec<(u32, u16)>>,
    pub exec_script: Mutex<ExecScript>,
    pub fail_create: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_start: AtomicBool,
    /// Delay before a create is applied.
    pub create_delay: Mutex<Option<Duration>>,
    /// Delay before a task start is applied.
    pub start_delay: Mutex<Option<Duration>>,
    /// Write ends of started containers' stdout FIFOs.
    outputs: Mutex<HashMap<String, pipe::Sender>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    pub fn request(&self, id: &str) -> Option<CreateContainerRequest> {
        self.containers.lock().unwrap().get(id).cloned()
    }

    pub fn set_exec_script(&self, script: ExecScript) {
        *self.exec_script.lock().unwrap() = script;
    }

    /// Writes `data` to a started container's stdout FIFO.
    pub async fn write_output(&self, id: &str, data: &[u8]) {
        let mut sender = self.outputs.lock().unwrap().remove(id).expect("container not started");
        sender.write_all(data).await.unwrap();
        self.outputs.lock().unwrap().insert(id.to_string(), sender);
    }

    /// Closes a started container's stdout FIFO, ending attached output.
    pub fn close_output(&self, id: &str) {
        self.outputs.lock().unwrap().remove(id);
    }

    fn engine_error(operation: &'static str, id: &str) -> Error {
        Error::Engine {
            operation,
            id: id.to_string(),
            reason: "injected failure".to_string(),
        }
    }
}

#[async_trait]
impl ExecutionEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create_container(&self, request: CreateContainerRequest) -> Result<EngineHandle> {
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Self::engine_error("create", &request.id));
        }
        let handle = EngineHandle::new(request.id.clone());
        self.containers.lock().unwrap().insert(request.id.clone(), request);
        Ok(handle)
    }

    async fn delete_container(&self, handle: &EngineHandle, opts: DeleteOptions) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::engine_error("delete", handle.id()));
        }
        assert!(opts.cleanup_snapshot, "snapshot must be cleaned up");
        self.containers.lock().unwrap().remove(handle.id());
        self.outputs.lock().unwrap().remove(handle.id());
        self.deleted.lock().unwrap().push(handle.id().to_string());
        Ok(())
    }

    async fn extension(&self, handle: &EngineHandle, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .get(handle.id())
            .and_then(|r| r.extensions.get(key).cloned()))
    }

    async fn start_task(&self, handle: &EngineHandle, fifos: &FifoSet) -> Result<u32> {
        let delay = *self.start_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Self::engine_error("start", handle.id()));
        }
        let sender = pipe::OpenOptions::new()
            .read_write(true)
            .open_sender(&fifos.stdout)?;
        self.outputs
            .lock()
            .unwrap()
            .insert(handle.id().to_string(), sender);
        self.started.lock().unwrap().push(handle.id().to_string());
        Ok(1000)
    }

    async fn task_pid(&self, _handle: &EngineHandle) -> Result<u32> {
        Ok(SANDBOX_PID)
    }

    async fn resize_task(&self, handle: &EngineHandle, size: TerminalSize) -> Result<()> {
        self.task_resizes
            .lock()
            .unwrap()
            .push((handle.id().to_string(), size));
        Ok(())
    }

    async fn exec(
        &self,
        _handle: &EngineHandle,
        _exec_id: &str,
        process: ExecProcess,
        io: ProcessIo,
    ) -> Result<Box<dyn ProcessHandle>> {
        assert!(!process.args.is_empty());
        let script = self.exec_script.lock().unwrap().clone();
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            let ProcessIo {
                stdin,
                mut stdout,
                mut stderr,
                ..
            } = io;
            if let Some(mut stdin) = stdin {
                let mut echoed = Vec::new();
                let _ = stdin.read_to_end(&mut echoed).await;
                if let Some(out) = stdout.as_mut() {
                    let _ = out.write_all(&echoed).await;
                }
            }
            if let Some(mut out) = stdout.take() {
                let _ = out.write_all(&script.stdout).await;
                let _ = out.shutdown().await;
            }
            if let Some(mut err) = stderr.take() {
                let _ = err.write_all(&script.stderr).await;
                let _ = err.shutdown().await;
            }
            let _ = done_tx.send(script.exit_code);
        });

        Ok(Box::new(FakeProcess {
            exit: tokio::sync::Mutex::new(Some(done_rx)),
            resizes: self.exec_resizes.clone(),
        }))
    }

    async fn port_forward(&self, pid: u32, port: u16, stream: BoxedStream) -> Result<()> {
        self.forwards.lock().unwrap().push((pid, port));
        let (mut reader, mut writer) = tokio::io::split(stream);
        tokio::io::copy(&mut reader, &mut writer).await?;
        writer.shutdown().await?;
        Ok(())
    }
}

struct FakeProcess {
    exit: tokio::sync::Mutex<Option<oneshot::Receiver<i32>>>,
    resizes: Arc<Mutex<Vec<TerminalSize>>>,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> u32 {
        2000
    }

    async fn resize(&self, size: TerminalSize) -> Result<()> {
        self.resizes.lock().unwrap().push(size);
        Ok(())
    }

    async fn wait(&self) -> Result<i32> {
        let rx = self
            .exit
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Internal("already waited".to_string()))?;
        rx.await
            .map_err(|_| Error::Internal("process vanished".to_string()))
    }
}

// =============================================================================
// Fake Host
// =============================================================================

/// Host with a scripted mount table and device set.
pub struct FakeHost {
    /// Mount table searched longest-prefix first.
    pub mounts: Mutex<Vec<MountInfo>>,
    pub devices: Vec<HostDevice>,
    pub ensured: Mutex<Vec<PathBuf>>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            mounts: Mutex::new(vec![MountInfo::new("/", "")]),
            devices: vec![
                char_device("/dev/null", 1, 3),
                char_device("/dev/zero", 1, 5),
                char_device("/dev/fuse", 10, 229),
            ],
            ensured: Mutex::new(Vec::new()),
        }
    }
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a mountpoint with the given optional fields.
    pub fn add_mount(&self, mountpoint: &str, optional: &str) {
        self.mounts
            .lock()
            .unwrap()
            .push(MountInfo::new(mountpoint, optional));
    }
}

pub fn char_device(path: &str, major: i64, minor: i64) -> HostDevice {
    HostDevice {
        path: PathBuf::from(path),
        dev_type: DeviceType::Char,
        major,
        minor,
        file_mode: 0o666,
        uid: 0,
        gid: 0,
        permissions: "rwm".to_string(),
    }
}

impl HostOs for FakeHost {
    fn ensure_dir(&self, path: &Path) -> Result<()> {
        self.ensured.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    fn resolve_symlinks(&self, path: &Path) -> Result<PathBuf> {
        Ok(path.to_path_buf())
    }

    fn lookup_mount(&self, path: &Path) -> Result<MountInfo> {
        let mounts = self.mounts.lock().unwrap();
        magikcri::spec::mounts::find_mount(&mounts, path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.display().to_string()))
    }

    fn device(&self, path: &Path, permissions: &str) -> Result<HostDevice> {
        self.devices
            .iter()
            .find(|d| d.path == path)
            .map(|d| HostDevice {
                permissions: permissions.to_string(),
                ..d.clone()
            })
            .ok_or_else(|| Error::InvalidDevice {
                path: path.to_path_buf(),
                reason: "not a device".to_string(),
            })
    }

    fn host_devices(&self) -> Result<Vec<HostDevice>> {
        Ok(self.devices.clone())
    }
}

// =============================================================================
// Duplex Transport
// =============================================================================

type Incoming = (Headers, BoxedStream);

/// Client end of an in-memory connection.
pub struct DuplexConnection {
    tx: Mutex<Option<mpsc::UnboundedSender<Incoming>>>,
}

/// Server end of an in-memory connection.
pub struct DuplexAcceptor {
    rx: mpsc::UnboundedReceiver<Incoming>,
}

/// Creates a connected client/server pair.
pub fn transport() -> (DuplexConnection, DuplexAcceptor) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        DuplexConnection {
            tx: Mutex::new(Some(tx)),
        },
        DuplexAcceptor { rx },
    )
}

#[async_trait]
impl StreamConnection for DuplexConnection {
    async fn create_stream(&self, headers: Headers) -> Result<BoxedStream> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let guard = self.tx.lock().unwrap();
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::Transport("connection closed".to_string()))?;
        tx.send((headers, Box::new(server)))
            .map_err(|_| Error::Transport("peer gone".to_string()))?;
        Ok(Box::new(client))
    }

    async fn close(&self) -> Result<()> {
        self.tx.lock().unwrap().take();
        Ok(())
    }
}

#[async_trait]
impl StreamAcceptor for DuplexAcceptor {
    async fn accept(&mut self) -> Result<Option<(Headers, BoxedStream)>> {
        Ok(self.rx.recv().await)
    }
}

/// Upgrader that either negotiates against `server` or forces a reply.
pub struct FakeUpgrader {
    pub server: Vec<ProtocolVersion>,
    /// Protocol the peer claims to have chosen, bypassing selection.
    pub forced: Option<String>,
    pub offered: Mutex<Vec<String>>,
    pub acceptor: Mutex<Option<DuplexAcceptor>>,
}

impl FakeUpgrader {
    pub fn new(server: Vec<ProtocolVersion>) -> Self {
        Self {
            server,
            forced: None,
            offered: Mutex::new(Vec::new()),
            acceptor: Mutex::new(None),
        }
    }

    pub fn forcing(chosen: &str) -> Self {
        Self {
            forced: Some(chosen.to_string()),
            ..Self::new(ProtocolVersion::PREFERRED.to_vec())
        }
    }

    pub fn take_acceptor(&self) -> DuplexAcceptor {
        self.acceptor.lock().unwrap().take().expect("not upgraded")
    }
}

#[async_trait]
impl Upgrader for FakeUpgrader {
    async fn upgrade(
        &self,
        protocols: &[&'static str],
    ) -> Result<(Box<dyn StreamConnection>, String)> {
        let offered: Vec<String> = protocols.iter().map(|p| p.to_string()).collect();
        *self.offered.lock().unwrap() = offered.clone();
        let chosen = match &self.forced {
            Some(forced) => forced.clone(),
            None => select_protocol(&offered, &self.server)?.name().to_string(),
        };
        let (conn, acceptor) = transport();
        *self.acceptor.lock().unwrap() = Some(acceptor);
        Ok((Box::new(conn), chosen))
    }
}

// =============================================================================
// Service Fixture
// =============================================================================

pub struct Fixture {
    pub dir: TempDir,
    pub engine: Arc<FakeEngine>,
    pub host: Arc<FakeHost>,
    pub service: Arc<ContainerService>,
    pub sandbox_id: String,
}

pub fn test_image() -> Image {
    Image::new(
        "sha256:1111111111111111111111111111111111111111111111111111111111111111",
        TEST_IMAGE,
        ImageConfig {
            entrypoint: vec!["/bin/sh".to_string()],
            cmd: vec!["-c".to_string(), "sleep 3600".to_string()],
            env: vec!["HOME=/root".to_string()],
            ..ImageConfig::default()
        },
    )
}

pub fn sandbox_config(name: &str) -> SandboxConfig {
    SandboxConfig {
        name: name.to_string(),
        uid: format!("{name}-uid"),
        namespace: "default".to_string(),
        log_directory: "/var/log/pods/test".to_string(),
        ..SandboxConfig::default()
    }
}

pub fn container_config(name: &str) -> magikcri::ContainerConfig {
    magikcri::ContainerConfig {
        name: name.to_string(),
        image: TEST_IMAGE.to_string(),
        ..magikcri::ContainerConfig::default()
    }
}

impl Fixture {
    /// A fresh service over the same root, engine, host and images, as
    /// after a shim restart.
    pub fn restart(&self) -> ContainerService {
        ContainerService::new(
            self.service.config().clone(),
            self.engine.clone(),
            self.service.images().clone(),
            self.host.clone(),
        )
        .unwrap()
    }
}

/// Service rooted in a temp dir with one image and one sandbox.
pub fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let engine = FakeEngine::new();
    let host = FakeHost::new();

    let mut config = ShimConfig::with_root_dir(dir.path().join("root"));
    config.seccomp_enabled = true;
    config.apparmor_enabled = false;

    let images = Arc::new(ImageStore::new());
    images.add(test_image()).unwrap();

    let service = ContainerService::new(config, engine.clone(), images, host.clone()).unwrap();
    let sandbox_id = service
        .add_sandbox(sandbox_config("pod"), EngineHandle::new("sandbox-task"), None)
        .unwrap();

    Fixture {
        dir,
        engine,
        host,
        service: Arc::new(service),
        sandbox_id,
    }
}
