//! Container I/O plumbing.
//!
//! Every container owns a [`ContainerIo`]: a set of named pipes the engine
//! connects to the container's stdio, plus in-process fan-out so any number
//! of attach sessions can read output concurrently.
//!
//! ```text
//!   engine process ──► stdout FIFO ──► pump task ──► broadcast ──┬─► attach #1
//!                                                               └─► attach #2
//!   attach stdin ───► stdin FIFO ──► engine process
//! ```
//!
//! FIFOs follow the kubelet rules: stdin exists only when requested and
//! stderr only without a terminal (a tty merges both output streams).

use crate::error::{Error, Result};
use nix::sys::stat::Mode;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Buffered output chunks per attach subscriber before it starts lagging.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Read size for output pumps.
const OUTPUT_CHUNK_SIZE: usize = 32 * 1024;

// =============================================================================
// Boxed Stream Types
// =============================================================================

/// Bidirectional byte stream (a multiplexed sub-stream, a socket, ...).
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized> AsyncStream for T {}

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BoxedStream = Box<dyn AsyncStream>;

/// Caller-side stdio handed to exec or attach.
#[derive(Default)]
pub struct ProcessIo {
    pub stdin: Option<BoxedReader>,
    pub stdout: Option<BoxedWriter>,
    pub stderr: Option<BoxedWriter>,
    pub tty: bool,
}

impl std::fmt::Debug for ProcessIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessIo")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("tty", &self.tty)
            .finish()
    }
}

// =============================================================================
// FIFO Set
// =============================================================================

/// Paths of a container's stdio FIFOs, as handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoSet {
    pub stdin: Option<PathBuf>,
    pub stdout: PathBuf,
    pub stderr: Option<PathBuf>,
    pub terminal: bool,
}

impl FifoSet {
    fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.stdin
            .iter()
            .chain(std::iter::once(&self.stdout))
            .chain(self.stderr.iter())
    }
}

type OutputSlot = Arc<Mutex<Option<broadcast::Sender<Vec<u8>>>>>;

/// Output FIFO read end opened ahead of its pump.
struct OpenOutput {
    path: PathBuf,
    receiver: pipe::Receiver,
    slot: OutputSlot,
}

// =============================================================================
// Container I/O
// =============================================================================

/// I/O bundle owned by one container.
///
/// Closed exactly once; further `close` calls are no-ops.
pub struct ContainerIo {
    id: String,
    fifos: FifoSet,
    stdout: OutputSlot,
    stderr: Option<OutputSlot>,
    opened: Mutex<Vec<OpenOutput>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl ContainerIo {
    /// Creates the FIFOs for container `id` inside `dir`.
    ///
    /// On failure every FIFO created so far is removed again.
    pub fn create(id: &str, dir: &Path, stdin: bool, tty: bool) -> Result<Self> {
        Self::build(id, dir, stdin, tty, false)
    }

    /// Reopens the I/O bundle of a container from a previous run.
    ///
    /// FIFOs still on disk are reused; missing ones are created.
    pub fn recover(id: &str, dir: &Path, stdin: bool, tty: bool) -> Result<Self> {
        Self::build(id, dir, stdin, tty, true)
    }

    fn build(id: &str, dir: &Path, stdin: bool, tty: bool, reuse: bool) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let fifos = FifoSet {
            stdin: stdin.then(|| dir.join(format!("{id}-stdin"))),
            stdout: dir.join(format!("{id}-stdout")),
            stderr: (!tty).then(|| dir.join(format!("{id}-stderr"))),
            terminal: tty,
        };

        let mut created: Vec<&PathBuf> = Vec::new();
        for path in fifos.paths() {
            match nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o700)) {
                Ok(()) => created.push(path),
                Err(nix::errno::Errno::EEXIST) if reuse => {}
                Err(e) => {
                    for done in created {
                        let _ = std::fs::remove_file(done);
                    }
                    return Err(e.into());
                }
            }
        }

        let (stdout_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let stderr = fifos.stderr.as_ref().map(|_| {
            let (tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
            Arc::new(Mutex::new(Some(tx)))
        });

        tracing::debug!(container = %id, dir = %dir.display(), stdin, tty, reuse, "Prepared container FIFOs");

        Ok(Self {
            id: id.to_string(),
            fifos,
            stdout: Arc::new(Mutex::new(Some(stdout_tx))),
            stderr,
            opened: Mutex::new(Vec::new()),
            pumps: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// FIFO paths for the engine.
    pub fn fifos(&self) -> &FifoSet {
        &self.fifos
    }

    /// Returns true once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Opens the read ends of the output FIFOs without reading yet.
    ///
    /// Runs before the engine starts the task so a writer opening its end
    /// in blocking mode finds a reader. Idempotent.
    pub fn open_outputs(&self) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut opened = self
            .opened
            .lock()
            .map_err(|_| Error::Internal("io output lock poisoned".to_string()))?;
        if !opened.is_empty() {
            return Ok(());
        }
        let mut outputs = vec![(self.fifos.stdout.clone(), self.stdout.clone())];
        if let (Some(path), Some(slot)) = (&self.fifos.stderr, &self.stderr) {
            outputs.push((path.clone(), slot.clone()));
        }
        for (path, slot) in outputs {
            let receiver = pipe::OpenOptions::new().open_receiver(&path)?;
            opened.push(OpenOutput {
                path,
                receiver,
                slot,
            });
        }
        tracing::trace!(container = %self.id, outputs = opened.len(), "Opened output FIFOs");
        Ok(())
    }

    /// Starts reading the output FIFOs into the fan-out channels.
    ///
    /// Opens the read ends first if [`open_outputs`](Self::open_outputs)
    /// has not run. Idempotent.
    pub fn start(&self) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.open_outputs()?;
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let opened: Vec<OpenOutput> = self
            .opened
            .lock()
            .map_err(|_| Error::Internal("io output lock poisoned".to_string()))?
            .drain(..)
            .collect();
        let mut pumps = self
            .pumps
            .lock()
            .map_err(|_| Error::Internal("io pump lock poisoned".to_string()))?;
        for output in opened {
            pumps.push(spawn_pump(output)?);
        }
        Ok(())
    }

    /// Connects caller stdio to the container.
    ///
    /// Returns when output ends (container exit or close). With no output
    /// requested, returns when stdin reaches end-of-file.
    pub async fn attach(&self, io: ProcessIo) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let mut outputs = Vec::new();
        if let Some(writer) = io.stdout {
            if let Some(rx) = subscribe(&self.stdout) {
                outputs.push(tokio::spawn(forward_output(rx, writer)));
            }
        }
        if let (Some(writer), Some(slot)) = (io.stderr, &self.stderr) {
            if let Some(rx) = subscribe(slot) {
                outputs.push(tokio::spawn(forward_output(rx, writer)));
            }
        }

        let stdin = match (io.stdin, &self.fifos.stdin) {
            (Some(reader), Some(path)) => Some(tokio::spawn(copy_stdin(reader, path.clone()))),
            _ => None,
        };

        if outputs.is_empty() {
            if let Some(task) = stdin {
                return task
                    .await
                    .map_err(|e| Error::Internal(format!("stdin task failed: {e}")))?;
            }
            return Ok(());
        }

        for task in outputs {
            if let Err(e) = task.await {
                tracing::debug!(container = %self.id, error = %e, "Attach output task ended abnormally");
            }
        }
        if let Some(task) = stdin {
            task.abort();
        }
        Ok(())
    }

    /// Stops output fan-out and removes the FIFOs.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        take_sender(&self.stdout);
        if let Some(slot) = &self.stderr {
            take_sender(slot);
        }
        if let Ok(mut opened) = self.opened.lock() {
            opened.clear();
        }
        if let Ok(mut pumps) = self.pumps.lock() {
            for pump in pumps.drain(..) {
                pump.abort();
            }
        }

        for path in self.fifos.paths() {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(container = %self.id, "Closed container I/O");
        Ok(())
    }

    fn closed_error(&self) -> Error {
        Error::InvalidState {
            id: self.id.clone(),
            state: "io closed".to_string(),
            expected: "io open".to_string(),
        }
    }
}

impl std::fmt::Debug for ContainerIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerIo")
            .field("id", &self.id)
            .field("fifos", &self.fifos)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn subscribe(slot: &OutputSlot) -> Option<broadcast::Receiver<Vec<u8>>> {
    slot.lock().ok()?.as_ref().map(broadcast::Sender::subscribe)
}

fn take_sender(slot: &OutputSlot) {
    if let Ok(mut sender) = slot.lock() {
        sender.take();
    }
}

fn spawn_pump(output: OpenOutput) -> Result<JoinHandle<()>> {
    let OpenOutput {
        path,
        mut receiver,
        slot,
    } = output;
    let tx = slot
        .lock()
        .map_err(|_| Error::Internal("io output lock poisoned".to_string()))?
        .clone();

    Ok(tokio::spawn(async move {
        let Some(tx) = tx else {
            return;
        };
        let mut buf = vec![0u8; OUTPUT_CHUNK_SIZE];
        loop {
            match receiver.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    // No subscribers is fine: output is dropped.
                    let _ = tx.send(buf[..n].to_vec());
                }
                Err(e) => {
                    tracing::debug!(fifo = %path.display(), error = %e, "Output pump read failed");
                    break;
                }
            }
        }
        take_sender(&slot);
    }))
}

async fn forward_output(mut rx: broadcast::Receiver<Vec<u8>>, mut writer: BoxedWriter) {
    loop {
        match rx.recv().await {
            Ok(chunk) => {
                if writer.write_all(&chunk).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Attach client lagging, output dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    let _ = writer.shutdown().await;
}

async fn copy_stdin(mut reader: BoxedReader, path: PathBuf) -> Result<()> {
    let mut sender = pipe::OpenOptions::new().open_sender(&path)?;
    tokio::io::copy(&mut reader, &mut sender).await?;
    Ok(())
}
