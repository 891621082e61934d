//! # Interactive Streaming
//!
//! Exec, attach and port-forward over a single multiplexed connection.
//!
//! ```text
//!   client                                          server
//!   ──────                                          ──────
//!   StreamNegotiator ── upgrade(v4,v3,v2,v1) ──────► select_protocol
//!          │                                             │
//!   StreamSession                                   accept_streams
//!     error  ◄──────────────── status ───────────────── error
//!     stdin  ─────────────────────────────────────────► stdin  ─┐
//!     stdout ◄───────────────────────────────────────── stdout  │ StreamRuntime
//!     stderr ◄───────────────────────────────────────── stderr  │ (exec / attach)
//!     resize ─────────── {"Width":80,"Height":24} ────► resize ─┘
//! ```
//!
//! The transport itself (SPDY, websockets, an in-process duplex in tests)
//! is abstracted behind [`StreamConnection`], [`StreamAcceptor`] and
//! [`Upgrader`]. Every sub-stream is created from a header map whose
//! `streamType` entry names its purpose.

mod negotiate;
pub mod portforward;
mod protocol;
mod resize;
mod runtime;
mod server;
mod session;

pub use negotiate::{select_protocol, StreamNegotiator};
pub use protocol::{
    ErrorFormat, ProtocolBehavior, ProtocolTable, ProtocolVersion, ResizeMode, Status,
    StatusCause, StatusDetails, StreamType, TerminalSize, DEFAULT_HANDLERS,
};
pub use resize::{decode_resize_stream, forward_resizes, handle_resizing};
pub use runtime::StreamRuntime;
pub use server::{
    accept_streams, accept_streams_with_timeout, serve_attach, serve_exec, AcceptedStreams,
    StreamRequest,
};
pub use session::{StreamOptions, StreamSession};

use crate::config::StreamConfig;
use crate::constants::STREAM_TYPE_HEADER;
use crate::error::Result;
use crate::io::BoxedStream;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Sub-stream headers.
pub type Headers = BTreeMap<String, String>;

/// Headers for a sub-stream of `stream_type`.
pub fn stream_headers(stream_type: StreamType) -> Headers {
    let mut headers = Headers::new();
    headers.insert(
        STREAM_TYPE_HEADER.to_string(),
        stream_type.header_value().to_string(),
    );
    headers
}

/// Binds the TCP listener whose connections the transport upgrades.
pub async fn bind_listener(config: &StreamConfig) -> Result<tokio::net::TcpListener> {
    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Stream server listening");
    Ok(listener)
}

/// Reads the `streamType` header.
pub fn stream_type_of(headers: &Headers) -> Option<StreamType> {
    headers
        .get(STREAM_TYPE_HEADER)
        .and_then(|v| StreamType::from_header(v))
}

// =============================================================================
// Transport Traits
// =============================================================================

/// Client side of an upgraded connection.
#[async_trait]
pub trait StreamConnection: Send + Sync {
    /// Opens a new sub-stream described by `headers`.
    async fn create_stream(&self, headers: Headers) -> Result<BoxedStream>;

    /// Tears the connection down.
    async fn close(&self) -> Result<()>;
}

/// Server side of an upgraded connection.
#[async_trait]
pub trait StreamAcceptor: Send {
    /// Waits for the next sub-stream. `None` once the connection is closed.
    async fn accept(&mut self) -> Result<Option<(Headers, BoxedStream)>>;
}

/// Performs the protocol upgrade handshake.
#[async_trait]
pub trait Upgrader: Send + Sync {
    /// Offers `protocols` (most preferred first) and returns the connection
    /// together with the protocol the peer chose (empty if it chose none).
    async fn upgrade(
        &self,
        protocols: &[&'static str],
    ) -> Result<(Box<dyn StreamConnection>, String)>;
}
