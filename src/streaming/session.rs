//! Client side of a remote command session.

use super::protocol::{ProtocolBehavior, StreamType, TerminalSize};
use super::resize::forward_resizes;
use super::{stream_headers, StreamConnection};
use crate::constants::MAX_ERROR_STREAM_LEN;
use crate::error::{Error, Result};
use crate::io::{BoxedReader, BoxedStream, BoxedWriter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Local stdio for a session.
#[derive(Default)]
pub struct StreamOptions {
    pub stdin: Option<BoxedReader>,
    pub stdout: Option<BoxedWriter>,
    pub stderr: Option<BoxedWriter>,
    pub tty: bool,
    /// Terminal size events. Only used with a tty on v3 and later.
    pub resize: Option<mpsc::Receiver<TerminalSize>>,
}

/// One remote command session over a negotiated connection.
pub struct StreamSession {
    conn: Box<dyn StreamConnection>,
    behavior: ProtocolBehavior,
}

impl StreamSession {
    pub fn new(conn: Box<dyn StreamConnection>, behavior: &ProtocolBehavior) -> Self {
        Self {
            conn,
            behavior: *behavior,
        }
    }

    pub fn behavior(&self) -> &ProtocolBehavior {
        &self.behavior
    }

    /// Runs the session to completion and closes the connection.
    ///
    /// Returns once remote output has ended, with the outcome reported on
    /// the error stream.
    pub async fn stream(self, opts: StreamOptions) -> Result<()> {
        let outcome = self.run(opts).await;
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "Failed to close stream connection");
        }
        outcome
    }

    async fn run(&self, opts: StreamOptions) -> Result<()> {
        let behavior = &self.behavior;

        // The error stream goes first so the server can report failures in
        // setting up the others.
        let error = self.create(StreamType::Error).await?;
        let stdin = match opts.stdin {
            Some(reader) => Some((reader, self.create(StreamType::Stdin).await?)),
            None => None,
        };
        let stdout = match opts.stdout {
            Some(writer) => Some((writer, self.create(StreamType::Stdout).await?)),
            None => None,
        };
        let stderr = match opts.stderr.filter(|_| !opts.tty) {
            Some(writer) => Some((writer, self.create(StreamType::Stderr).await?)),
            None => None,
        };
        let resize = if opts.tty && behavior.supports_resize() {
            Some(self.create(StreamType::Resize).await?)
        } else {
            None
        };

        let error_reader = tokio::spawn(read_error_stream(error));

        let mut background: Vec<JoinHandle<()>> = Vec::new();
        if let Some((mut reader, mut stream)) = stdin {
            let half_close = behavior.half_close_stdin;
            background.push(tokio::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut reader, &mut stream).await {
                    tracing::debug!(error = %e, "Copying stdin ended");
                }
                if half_close {
                    let _ = stream.shutdown().await;
                }
            }));
        }
        if let Some(mut stream) = resize {
            match opts.resize {
                Some(rx) => {
                    let mode = behavior.resize;
                    background.push(tokio::spawn(async move {
                        if let Err(e) = forward_resizes(rx, stream, mode).await {
                            tracing::debug!(error = %e, "Resize forwarding ended");
                        }
                    }));
                }
                None => {
                    let _ = stream.shutdown().await;
                }
            }
        }

        let mut outputs = Vec::new();
        for (writer, stream) in stdout.into_iter().chain(stderr) {
            outputs.push(tokio::spawn(copy_output(stream, writer)));
        }
        for task in outputs {
            if let Err(e) = task.await {
                tracing::debug!(error = %e, "Output copy task ended abnormally");
            }
        }

        let raw = error_reader
            .await
            .map_err(|e| Error::Internal(format!("error stream task failed: {e}")));
        for task in background {
            task.abort();
        }
        behavior.decode_error(&raw??)
    }

    async fn create(&self, stream_type: StreamType) -> Result<BoxedStream> {
        self.conn
            .create_stream(stream_headers(stream_type))
            .await
            .map_err(|e| Error::Transport(format!("error creating {stream_type} stream: {e}")))
    }
}

async fn copy_output(mut stream: BoxedStream, mut writer: BoxedWriter) {
    if let Err(e) = tokio::io::copy(&mut stream, &mut writer).await {
        tracing::debug!(error = %e, "Copying output ended");
    }
    let _ = writer.flush().await;
}

async fn read_error_stream(stream: BoxedStream) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    stream
        .take(MAX_ERROR_STREAM_LEN as u64)
        .read_to_end(&mut raw)
        .await
        .map_err(|e| Error::Transport(format!("error reading from error stream: {e}")))?;
    Ok(raw)
}
