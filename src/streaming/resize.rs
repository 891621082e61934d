//! Terminal resize propagation.
//!
//! ```text
//!  client queue ─► forward_resizes ─► resize stream ─► decode_resize_stream ─► channel ─► handle_resizing ─► engine
//! ```

use super::protocol::{ResizeMode, TerminalSize};
use crate::constants::MAX_RESIZE_MESSAGE_LEN;
use crate::error::{Error, Result};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Read size for the resize stream.
const RESIZE_READ_CHUNK: usize = 512;

/// Applies every valid size from `rx` until the channel closes.
///
/// Sizes with a zero dimension are skipped. Callback failures are logged
/// and do not end the task.
pub fn handle_resizing<F, Fut>(mut rx: mpsc::Receiver<TerminalSize>, mut resize: F) -> JoinHandle<()>
where
    F: FnMut(TerminalSize) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(size) = rx.recv().await {
            if !size.is_valid() {
                continue;
            }
            if let Err(e) = resize(size).await {
                tracing::warn!(
                    width = size.width,
                    height = size.height,
                    error = %e,
                    "Failed to resize terminal"
                );
            }
        }
        tracing::debug!("Resize channel closed");
    })
}

/// Writes sizes from `rx` to the resize stream as JSON.
///
/// With [`ResizeMode::Coalesce`] any sizes already queued behind the current
/// one are collapsed and only the most recent is written.
pub async fn forward_resizes<W>(
    mut rx: mpsc::Receiver<TerminalSize>,
    mut writer: W,
    mode: ResizeMode,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut size) = rx.recv().await {
        if mode == ResizeMode::Coalesce {
            while let Ok(newer) = rx.try_recv() {
                size = newer;
            }
        }
        let payload = serde_json::to_vec(&size)?;
        writer
            .write_all(&payload)
            .await
            .map_err(|e| Error::Transport(format!("resize stream write failed: {e}")))?;
    }
    let _ = writer.shutdown().await;
    Ok(())
}

/// Decodes concatenated JSON sizes from `reader` into `tx`.
///
/// Ends at end-of-stream or when the receiver is gone. A message that grows
/// past [`MAX_RESIZE_MESSAGE_LEN`] without parsing is rejected.
pub async fn decode_resize_stream<R>(mut reader: R, tx: mpsc::Sender<TerminalSize>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; RESIZE_READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut sizes = Vec::new();
        let consumed = {
            let mut events = serde_json::Deserializer::from_slice(&buf).into_iter::<TerminalSize>();
            loop {
                match events.next() {
                    Some(Ok(size)) => sizes.push(size),
                    Some(Err(e)) if e.is_eof() => break,
                    Some(Err(e)) => {
                        return Err(Error::Serialization(format!("invalid resize event: {e}")))
                    }
                    None => break,
                }
            }
            events.byte_offset()
        };
        buf.drain(..consumed);

        if buf.len() > MAX_RESIZE_MESSAGE_LEN {
            return Err(Error::Serialization(format!(
                "resize event exceeds {MAX_RESIZE_MESSAGE_LEN} bytes"
            )));
        }

        for size in sizes {
            if tx.send(size).await.is_err() {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_invalid_sizes_skipped_and_task_ends() {
        let (tx, rx) = mpsc::channel(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let task = {
            let seen = seen.clone();
            handle_resizing(rx, move |size| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(size);
                    Ok(())
                }
            })
        };

        for (w, h) in [(0, 0), (80, 24), (0, 5), (100, 40)] {
            tx.send(TerminalSize::new(w, h)).await.unwrap();
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![TerminalSize::new(80, 24), TerminalSize::new(100, 40)]
        );
    }

    #[tokio::test]
    async fn test_callback_error_does_not_stop_task() {
        let (tx, rx) = mpsc::channel(8);
        let calls = Arc::new(Mutex::new(0));
        let task = {
            let calls = calls.clone();
            handle_resizing(rx, move |_| {
                let calls = calls.clone();
                async move {
                    *calls.lock().unwrap() += 1;
                    Err(Error::NotSupported("resize".to_string()))
                }
            })
        };
        tx.send(TerminalSize::new(1, 1)).await.unwrap();
        tx.send(TerminalSize::new(2, 2)).await.unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_decode_split_and_concatenated_events() {
        let (mut client, server) = tokio::io::duplex(256);
        let (tx, mut rx) = mpsc::channel(8);
        let decoder = tokio::spawn(decode_resize_stream(server, tx));

        client.write_all(br#"{"Width":80,"Hei"#).await.unwrap();
        client.write_all(br#"ght":24}{"Width":100,"Height":40}"#).await.unwrap();
        drop(client);

        assert_eq!(rx.recv().await, Some(TerminalSize::new(80, 24)));
        assert_eq!(rx.recv().await, Some(TerminalSize::new(100, 40)));
        decoder.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_decode_rejects_garbage() {
        let (mut client, server) = tokio::io::duplex(256);
        let (tx, _rx) = mpsc::channel(8);
        client.write_all(b"not json").await.unwrap();
        drop(client);
        assert!(decode_resize_stream(server, tx).await.is_err());
    }

    #[tokio::test]
    async fn test_coalesce_writes_latest_only() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(TerminalSize::new(10, 10)).await.unwrap();
        tx.send(TerminalSize::new(20, 20)).await.unwrap();
        tx.send(TerminalSize::new(30, 30)).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        forward_resizes(rx, &mut out, ResizeMode::Coalesce).await.unwrap();
        assert_eq!(out, br#"{"Width":30,"Height":30}"#);
    }

    #[tokio::test]
    async fn test_every_event_writes_all() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(TerminalSize::new(10, 10)).await.unwrap();
        tx.send(TerminalSize::new(20, 20)).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        forward_resizes(rx, &mut out, ResizeMode::EveryEvent).await.unwrap();
        assert_eq!(out, br#"{"Width":10,"Height":10}{"Width":20,"Height":20}"#);
    }
}
