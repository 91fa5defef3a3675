//! Completing the WebSocket handshake on a stream whose request head has
//! already been read.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::WebSocketStream;

use crate::config::GatewayConfig;
use crate::errors::{GatewayError, Result};

pin_project! {
    /// A stream that yields `prefix` before reading from `inner`.
    ///
    /// The router reads the request head to pick an endpoint; wrapping the
    /// socket replays those bytes so the handshake sees the full request.
    pub struct PrefixedStream<S> {
        prefix: Bytes,
        #[pin]
        inner: S,
    }
}

impl<S> PrefixedStream<S> {
    /// Wrap `inner`, replaying `prefix` first.
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    /// Bytes of the prefix not yet read.
    pub fn pending_prefix(&self) -> usize {
        self.prefix.len()
    }
}

impl<S: AsyncRead> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if this.prefix.is_empty() {
            return this.inner.poll_read(cx, buf);
        }
        let n = this.prefix.len().min(buf.remaining());
        buf.put_slice(&this.prefix.split_to(n));
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

/// Run the server side of the handshake within the configured timeout.
pub(crate) async fn accept<S>(stream: S, config: &GatewayConfig) -> Result<WebSocketStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handshake =
        tokio_tungstenite::accept_async_with_config(stream, Some(config.websocket_config()));
    match tokio::time::timeout(config.handshake_timeout(), handshake).await {
        Ok(Ok(ws)) => Ok(ws),
        Ok(Err(e)) => Err(GatewayError::Handshake(e)),
        Err(_) => Err(GatewayError::HandshakeTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn prefix_replayed_before_inner() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b" world").await.unwrap();
        drop(client);

        let mut stream = PrefixedStream::new(Bytes::from_static(b"hello"), server);
        let mut out = String::new();
        let _ = stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
        assert_eq!(stream.pending_prefix(), 0);
    }

    #[tokio::test]
    async fn small_reads_drain_prefix_gradually() {
        let (_client, server) = tokio::io::duplex(64);
        let mut stream = PrefixedStream::new(Bytes::from_static(b"abcdef"), server);
        let mut buf = [0u8; 4];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");
        assert_eq!(stream.pending_prefix(), 2);
    }

    #[tokio::test]
    async fn writes_pass_through() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut stream = PrefixedStream::new(Bytes::new(), server);
        stream.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn handshake_over_replayed_head() {
        let (client, server) = tokio::io::duplex(4096);
        let client_task = tokio::spawn(async move {
            tokio_tungstenite::client_async("ws://localhost/monitor", client).await
        });

        // Read part of the request ourselves, then replay it.
        let mut server = server;
        let mut head = vec![0u8; 16];
        server.read_exact(&mut head).await.unwrap();
        let stream = PrefixedStream::new(Bytes::from(head), server);

        let ws = accept(stream, &GatewayConfig::local()).await;
        assert!(ws.is_ok());
        assert!(client_task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn non_websocket_request_fails_handshake() {
        let (mut client, server) = tokio::io::duplex(4096);
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let err = accept(server, &GatewayConfig::local()).await.unwrap_err();
        assert_matches!(err, GatewayError::Handshake(_));
    }
}
