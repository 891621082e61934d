//! Port forwarding over a multiplexed connection.
//!
//! Each forwarded TCP connection is a pair of sub-streams sharing a
//! `requestID` header: a `data` stream carrying the payload and an `error`
//! stream on which the server reports forwarding failures.
//!
//! ```text
//!   client                                 server
//!   error  {streamType: error, port: 8080, requestID: 0} ──┐
//!   data   {streamType: data,  port: 8080, requestID: 0} ──┴─► pair ─► engine.port_forward
//! ```

use super::protocol::StreamType;
use super::runtime::StreamRuntime;
use super::{stream_headers, stream_type_of, Headers, StreamAcceptor, StreamConnection};
use crate::constants::{
    MAX_ERROR_STREAM_LEN, PORT_FORWARD_PROTOCOL_V1, PORT_HEADER, REQUEST_ID_HEADER,
};
use crate::error::{Error, Result};
use crate::io::BoxedStream;
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinSet;

// =============================================================================
// Constants
// =============================================================================

/// Maximum half-opened stream pairs per connection.
///
/// **Security**: bounds memory held for clients that open one half of a
/// pair and never the other.
pub const MAX_PENDING_FORWARDS: usize = 1024;

// =============================================================================
// Forward Request
// =============================================================================

/// Identity of one forwarded connection, parsed from sub-stream headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    /// Requested port, validated later against 1..=65535.
    pub port: i64,
    pub request_id: String,
}

impl ForwardRequest {
    /// Parses the stream type, port and request ID headers.
    pub fn from_headers(headers: &Headers) -> Result<(StreamType, Self)> {
        let stream_type = stream_type_of(headers)
            .filter(|t| matches!(t, StreamType::Data | StreamType::Error))
            .ok_or_else(|| Error::Transport(format!("invalid port-forward stream {headers:?}")))?;
        let port = headers
            .get(PORT_HEADER)
            .ok_or_else(|| Error::Transport(format!("{PORT_HEADER} header is required")))?;
        let port = port
            .parse::<i64>()
            .map_err(|_| Error::Transport(format!("invalid port header {port:?}")))?;
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Transport(format!("{REQUEST_ID_HEADER} header is required")))?
            .clone();
        Ok((stream_type, Self { port, request_id }))
    }

    fn headers(&self, stream_type: StreamType) -> Headers {
        let mut headers = stream_headers(stream_type);
        headers.insert(PORT_HEADER.to_string(), self.port.to_string());
        headers.insert(REQUEST_ID_HEADER.to_string(), self.request_id.clone());
        headers
    }
}

/// Checks the client offered the port-forward protocol.
pub fn select_port_forward_protocol(client: &[String]) -> Result<&'static str> {
    if client.iter().any(|p| p == PORT_FORWARD_PROTOCOL_V1) {
        Ok(PORT_FORWARD_PROTOCOL_V1)
    } else {
        Err(Error::ProtocolNegotiation(format!(
            "port forward requires {PORT_FORWARD_PROTOCOL_V1}, client offered {client:?}"
        )))
    }
}

// =============================================================================
// Server
// =============================================================================

#[derive(Default)]
struct PendingForward {
    port: i64,
    data: Option<BoxedStream>,
    error: Option<BoxedStream>,
}

/// Serves port-forward stream pairs for `sandbox_id` until the connection closes.
///
/// Malformed or duplicate streams are dropped with a warning; forwarding
/// failures are written to the pair's error stream.
pub async fn serve_port_forward(
    acceptor: &mut dyn StreamAcceptor,
    runtime: StreamRuntime,
    sandbox_id: &str,
) -> Result<()> {
    let mut pending: HashMap<String, PendingForward> = HashMap::new();
    let mut forwards = JoinSet::new();

    while let Some((headers, stream)) = acceptor.accept().await? {
        let (stream_type, request) = match ForwardRequest::from_headers(&headers) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(sandbox = %sandbox_id, error = %e, "Rejecting port-forward stream");
                continue;
            }
        };

        if !pending.contains_key(&request.request_id) && pending.len() >= MAX_PENDING_FORWARDS {
            tracing::warn!(
                sandbox = %sandbox_id,
                max = MAX_PENDING_FORWARDS,
                "Too many pending port-forward requests, dropping stream"
            );
            continue;
        }

        let entry = pending
            .entry(request.request_id.clone())
            .or_insert_with(|| PendingForward {
                port: request.port,
                ..PendingForward::default()
            });
        let slot = match stream_type {
            StreamType::Data => &mut entry.data,
            _ => &mut entry.error,
        };
        if slot.is_some() {
            tracing::warn!(
                sandbox = %sandbox_id,
                request_id = %request.request_id,
                stream = %stream_type,
                "Duplicate port-forward stream"
            );
            continue;
        }
        *slot = Some(stream);

        if entry.data.is_some() && entry.error.is_some() {
            if let Some(PendingForward {
                port,
                data: Some(data),
                error: Some(error),
            }) = pending.remove(&request.request_id)
            {
                tracing::debug!(sandbox = %sandbox_id, port, request_id = %request.request_id, "Forwarding port");
                forwards.spawn(forward_one(
                    runtime.clone(),
                    sandbox_id.to_string(),
                    port,
                    data,
                    error,
                ));
            }
        }
    }

    if !pending.is_empty() {
        tracing::debug!(sandbox = %sandbox_id, unpaired = pending.len(), "Dropping unpaired port-forward streams");
    }
    while let Some(joined) = forwards.join_next().await {
        if let Err(e) = joined {
            tracing::debug!(sandbox = %sandbox_id, error = %e, "Port-forward task ended abnormally");
        }
    }
    Ok(())
}

async fn forward_one(
    runtime: StreamRuntime,
    sandbox_id: String,
    port: i64,
    data: BoxedStream,
    mut error: BoxedStream,
) {
    if let Err(e) = runtime.port_forward(&sandbox_id, port, data).await {
        let message = format!("error forwarding port {port} to pod {sandbox_id}: {e}");
        tracing::warn!(sandbox = %sandbox_id, port, error = %e, "Port forward failed");
        if let Err(e) = error.write_all(message.as_bytes()).await {
            tracing::debug!(error = %e, "Failed to write port-forward error");
        }
    }
    let _ = error.shutdown().await;
}

// =============================================================================
// Client
// =============================================================================

/// Client half of one forwarded connection.
pub struct PortForwardStreams {
    pub data: BoxedStream,
    pub error: BoxedStream,
}

impl PortForwardStreams {
    /// Opens the error stream, then the data stream, for `port`.
    pub async fn open(conn: &dyn StreamConnection, port: u16, request_id: u64) -> Result<Self> {
        let request = ForwardRequest {
            port: i64::from(port),
            request_id: request_id.to_string(),
        };
        let error = conn.create_stream(request.headers(StreamType::Error)).await?;
        let data = conn.create_stream(request.headers(StreamType::Data)).await?;
        Ok(Self { data, error })
    }
}

/// Reads the error stream of a forwarded connection to its end.
pub async fn read_forward_error(error: BoxedStream) -> Result<()> {
    let mut raw = Vec::new();
    error
        .take(MAX_ERROR_STREAM_LEN as u64)
        .read_to_end(&mut raw)
        .await
        .map_err(|e| Error::Transport(format!("error reading port-forward error stream: {e}")))?;
    let message = String::from_utf8_lossy(&raw);
    let message = message.trim();
    if message.is_empty() {
        Ok(())
    } else {
        Err(Error::RemoteCommand(message.to_string()))
    }
}
