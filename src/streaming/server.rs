//! Server side of a remote command session.
//!
//! The server waits for the client to open every sub-stream the request
//! implies, then runs exec or attach with those streams as the process
//! stdio and reports the outcome on the error stream.

use super::protocol::{ProtocolBehavior, StreamType, TerminalSize};
use super::resize::decode_resize_stream;
use super::runtime::StreamRuntime;
use super::{stream_type_of, StreamAcceptor};
use crate::constants::STREAM_CREATION_TIMEOUT;
use crate::error::{Error, Result};
use crate::io::{BoxedReader, BoxedStream, BoxedWriter, ProcessIo};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// Resize events buffered between the decoder and the resize task.
const RESIZE_CHANNEL_CAPACITY: usize = 16;

/// Which stdio a caller asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamRequest {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub tty: bool,
}

impl StreamRequest {
    /// Sub-streams the client is expected to open.
    pub fn expected(&self, behavior: &ProtocolBehavior) -> Vec<StreamType> {
        let mut expected = vec![StreamType::Error];
        if self.stdin {
            expected.push(StreamType::Stdin);
        }
        if self.stdout {
            expected.push(StreamType::Stdout);
        }
        if self.stderr && !self.tty {
            expected.push(StreamType::Stderr);
        }
        if self.tty && behavior.supports_resize() {
            expected.push(StreamType::Resize);
        }
        expected
    }
}

/// Sub-streams opened by the client.
#[derive(Default)]
pub struct AcceptedStreams {
    pub error: Option<BoxedStream>,
    pub stdin: Option<BoxedStream>,
    pub stdout: Option<BoxedStream>,
    pub stderr: Option<BoxedStream>,
    pub resize: Option<BoxedStream>,
    pub tty: bool,
}

impl AcceptedStreams {
    fn slot(&mut self, stream_type: StreamType) -> Option<&mut Option<BoxedStream>> {
        match stream_type {
            StreamType::Error => Some(&mut self.error),
            StreamType::Stdin => Some(&mut self.stdin),
            StreamType::Stdout => Some(&mut self.stdout),
            StreamType::Stderr => Some(&mut self.stderr),
            StreamType::Resize => Some(&mut self.resize),
            StreamType::Data => None,
        }
    }

    fn has(&self, stream_type: StreamType) -> bool {
        match stream_type {
            StreamType::Error => self.error.is_some(),
            StreamType::Stdin => self.stdin.is_some(),
            StreamType::Stdout => self.stdout.is_some(),
            StreamType::Stderr => self.stderr.is_some(),
            StreamType::Resize => self.resize.is_some(),
            StreamType::Data => false,
        }
    }
}

/// Waits for the sub-streams `request` implies.
pub async fn accept_streams(
    acceptor: &mut dyn StreamAcceptor,
    request: StreamRequest,
    behavior: &ProtocolBehavior,
) -> Result<AcceptedStreams> {
    accept_streams_with_timeout(acceptor, request, behavior, STREAM_CREATION_TIMEOUT).await
}

/// [`accept_streams`] with an explicit deadline.
pub async fn accept_streams_with_timeout(
    acceptor: &mut dyn StreamAcceptor,
    request: StreamRequest,
    behavior: &ProtocolBehavior,
    timeout: Duration,
) -> Result<AcceptedStreams> {
    let expected = request.expected(behavior);
    let mut streams = AcceptedStreams {
        tty: request.tty,
        ..AcceptedStreams::default()
    };

    let collect = async {
        while !expected.iter().all(|t| streams.has(*t)) {
            let Some((headers, stream)) = acceptor.accept().await? else {
                return Err(Error::Transport(
                    "connection closed before all streams were created".to_string(),
                ));
            };
            let stream_type = stream_type_of(&headers).ok_or_else(|| {
                Error::Transport(format!("unexpected stream headers {headers:?}"))
            })?;
            let slot = streams.slot(stream_type).ok_or_else(|| {
                Error::Transport(format!("unexpected {stream_type} stream"))
            })?;
            if slot.is_some() {
                return Err(Error::Transport(format!("duplicate {stream_type} stream")));
            }
            tracing::trace!(stream = %stream_type, "Accepted sub-stream");
            *slot = Some(stream);
        }
        Ok(())
    };

    match tokio::time::timeout(timeout, collect).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(Error::Transport(format!(
                "timed out waiting for client to create streams after {timeout:?}"
            )))
        }
    }
    Ok(streams)
}

/// Runs `cmd` in `container_id` over accepted streams.
pub async fn serve_exec(
    runtime: &StreamRuntime,
    container_id: &str,
    cmd: Vec<String>,
    streams: AcceptedStreams,
    behavior: &ProtocolBehavior,
) -> Result<()> {
    let (io, error, resize) = split_streams(streams);
    let outcome = runtime.exec(container_id, cmd, io, resize).await;
    report_outcome(error, behavior, &outcome).await;
    outcome
}

/// Attaches to `container_id` over accepted streams.
pub async fn serve_attach(
    runtime: &StreamRuntime,
    container_id: &str,
    streams: AcceptedStreams,
    behavior: &ProtocolBehavior,
) -> Result<()> {
    let (io, error, resize) = split_streams(streams);
    let outcome = runtime.attach(container_id, io, resize).await;
    report_outcome(error, behavior, &outcome).await;
    outcome
}

fn split_streams(
    streams: AcceptedStreams,
) -> (
    ProcessIo,
    Option<BoxedStream>,
    Option<mpsc::Receiver<TerminalSize>>,
) {
    let resize = streams.resize.map(|stream| {
        let (tx, rx) = mpsc::channel(RESIZE_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            if let Err(e) = decode_resize_stream(stream, tx).await {
                tracing::warn!(error = %e, "Failed to decode resize stream");
            }
        });
        rx
    });

    let io = ProcessIo {
        stdin: streams.stdin.map(|s| Box::new(s) as BoxedReader),
        stdout: streams.stdout.map(|s| Box::new(s) as BoxedWriter),
        stderr: streams.stderr.map(|s| Box::new(s) as BoxedWriter),
        tty: streams.tty,
    };
    (io, streams.error, resize)
}

async fn report_outcome(error: Option<BoxedStream>, behavior: &ProtocolBehavior, outcome: &Result<()>) {
    let Some(mut error) = error else {
        return;
    };
    match behavior.encode_outcome(outcome) {
        Ok(Some(payload)) => {
            if let Err(e) = error.write_all(&payload).await {
                tracing::warn!(error = %e, "Failed to write to error stream");
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to encode stream outcome"),
    }
    let _ = error.shutdown().await;
}
