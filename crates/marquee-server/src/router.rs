//! Upgrade routing for shared listeners.
//!
//! Each inbound connection's HTTP request head is read and parsed here, the
//! request path picks the endpoint, and the stream (with the head replayed)
//! is handed to that endpoint's acceptor. A path nobody registered gets the
//! connection dropped without a single byte written.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use http::Uri;
use metrics::counter;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::endpoint::registry::EndpointRegistry;
use crate::handshake::PrefixedStream;

const BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
const UPGRADE_REQUIRED: &[u8] = b"HTTP/1.1 426 Upgrade Required\r\nConnection: close\r\nUpgrade: websocket\r\nContent-Length: 0\r\n\r\n";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Most header lines accepted in a request head.
const MAX_HEADERS: usize = 64;

/// Why a request head could not be read.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HeadError {
    /// The peer closed before finishing the head.
    Closed,
    /// The head exceeded the size limit.
    TooLarge,
    /// Transport failure.
    Io(std::io::ErrorKind),
}

/// Why a request head was rejected.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParseError {
    /// Not a valid HTTP/1.x request head.
    Malformed(httparse::Error),
    /// The head stops before its blank line.
    Incomplete,
    /// The request target has no usable path.
    BadTarget,
}

/// The parts of a request head the router cares about.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RequestHead {
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) path: String,
    pub(crate) is_upgrade: bool,
}

/// Route one connection accepted on `port`.
pub(crate) async fn route_connection<S>(
    mut stream: S,
    remote: SocketAddr,
    port: u16,
    endpoints: Arc<EndpointRegistry>,
    config: Arc<GatewayConfig>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let read = tokio::time::timeout(
        config.handshake_timeout(),
        read_head(&mut stream, config.max_request_head_bytes),
    );
    let head = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        head = read => head,
    };

    let buf = match head {
        Ok(Ok(buf)) => buf,
        Ok(Err(HeadError::TooLarge)) => {
            debug!(%remote, port, "request head too large");
            respond(&mut stream, BAD_REQUEST).await;
            return;
        }
        Ok(Err(e)) => {
            debug!(%remote, port, error = ?e, "connection ended before request head");
            return;
        }
        Err(_) => {
            debug!(%remote, port, "timed out waiting for request head");
            return;
        }
    };

    let request = match parse_head(&buf) {
        Ok(request) => request,
        Err(e) => {
            debug!(%remote, port, error = ?e, "malformed request head");
            respond(&mut stream, BAD_REQUEST).await;
            return;
        }
    };

    let Some(endpoint) = endpoints.find(port, &request.path) else {
        counter!("ws_routing_misses_total").increment(1);
        debug!(%remote, port, path = %request.path, "no endpoint for path, dropping connection");
        return;
    };

    if !request.is_upgrade {
        debug!(%remote, port, method = %request.method, target = %request.target, "not a websocket upgrade");
        respond(&mut stream, UPGRADE_REQUIRED).await;
        return;
    }

    let stream = PrefixedStream::new(buf.freeze(), stream);
    if let Err(e) = endpoint.accept(stream, remote).await {
        debug!(%remote, port, path = %request.path, error = %e, kind = e.error_kind(), "upgrade failed");
    }
}

/// Read until the end of the request head.
///
/// Returns everything read so far, which may include bytes past the head.
pub(crate) async fn read_head<R>(stream: &mut R, max: usize) -> Result<BytesMut, HeadError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(max.min(1024));
    loop {
        if let Some(end) = head_end(&buf) {
            return if end > max {
                Err(HeadError::TooLarge)
            } else {
                Ok(buf)
            };
        }
        if buf.len() >= max {
            return Err(HeadError::TooLarge);
        }
        match stream.read_buf(&mut buf).await {
            Ok(0) => return Err(HeadError::Closed),
            Ok(_) => {}
            Err(e) => return Err(HeadError::Io(e.kind())),
        }
    }
}

/// Offset just past the blank line ending the head.
fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
        .map(|pos| pos + HEAD_TERMINATOR.len())
}

/// Parse a complete request head.
pub(crate) fn parse_head(buf: &[u8]) -> Result<RequestHead, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    match request.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(ParseError::Incomplete),
        Err(e) => return Err(ParseError::Malformed(e)),
    }
    let (Some(method), Some(target)) = (request.method, request.path) else {
        return Err(ParseError::Incomplete);
    };

    let header_has = |name: &str, token: &str| {
        request.headers.iter().any(|h| {
            h.name.eq_ignore_ascii_case(name)
                && std::str::from_utf8(h.value).is_ok_and(|v| has_token(v, token))
        })
    };
    let is_upgrade = method == "GET"
        && header_has("upgrade", "websocket")
        && header_has("connection", "upgrade");

    let path = request_path(target).ok_or(ParseError::BadTarget)?;
    Ok(RequestHead {
        method: method.to_owned(),
        target: target.to_owned(),
        path,
        is_upgrade,
    })
}

fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Path of a request target, without query or fragment.
///
/// Absolute-form targets (`ws://host/path`) are reduced to their path. The
/// path itself is returned as sent, with no normalization.
fn request_path(target: &str) -> Option<String> {
    let uri: Uri = target.parse().ok()?;
    let path = uri.path();
    path.starts_with('/').then(|| path.to_owned())
}

async fn respond<S: AsyncWrite + Unpin>(stream: &mut S, response: &[u8]) {
    if stream.write_all(response).await.is_ok() {
        let _ = stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use assert_matches::assert_matches;
    use std::time::Duration;
    use tokio_util::task::TaskTracker;

    const UPGRADE: &str = "GET /monitor?token=1 HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: keep-alive, Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn parses_upgrade_request() {
        let head = parse_head(UPGRADE.as_bytes()).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.target, "/monitor?token=1");
        assert_eq!(head.path, "/monitor");
        assert!(head.is_upgrade);
    }

    #[test]
    fn plain_get_is_not_upgrade() {
        let head = parse_head(b"GET /monitor HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert!(!head.is_upgrade);
    }

    #[test]
    fn post_with_upgrade_headers_is_not_upgrade() {
        let head = parse_head(
            b"POST /m HTTP/1.1\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\r\n",
        )
        .unwrap();
        assert!(!head.is_upgrade);
    }

    #[test]
    fn malformed_heads_rejected() {
        assert_matches!(parse_head(b"GARBAGE\r\n\r\n"), Err(ParseError::Malformed(_)));
        assert_matches!(
            parse_head(b"GET /x SPDY\r\n\r\n"),
            Err(ParseError::Malformed(httparse::Error::Version))
        );
        assert_matches!(
            parse_head(b"GET /x HTTP/1.1\r\nno-colon\r\n\r\n"),
            Err(ParseError::Malformed(_))
        );
        assert_eq!(parse_head(b"GET /x HTTP/1.1\r\nHost: x\r\n"), Err(ParseError::Incomplete));
        assert_eq!(
            parse_head(b"OPTIONS * HTTP/1.1\r\n\r\n"),
            Err(ParseError::BadTarget)
        );
    }

    #[test]
    fn url_in_query_does_not_change_path() {
        let head = parse_head(
            b"GET /monitor?next=http://x HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
        )
        .unwrap();
        assert_eq!(head.path, "/monitor");
        assert_eq!(head.target, "/monitor?next=http://x");
        assert!(head.is_upgrade);
    }

    #[test]
    fn request_path_forms() {
        assert_eq!(request_path("/a/b?c#d").as_deref(), Some("/a/b"));
        assert_eq!(request_path("/a#frag").as_deref(), Some("/a"));
        assert_eq!(request_path("ws://host:9400/monitor").as_deref(), Some("/monitor"));
        assert_eq!(request_path("http://host?x=1").as_deref(), Some("/"));
        assert_eq!(
            request_path("/monitor?next=http://x/dashboard").as_deref(),
            Some("/monitor")
        );
        assert_eq!(request_path("/monitor?r=ws://h:1/p#f").as_deref(), Some("/monitor"));
        assert_eq!(request_path("/monitor/").as_deref(), Some("/monitor/"));
        assert_eq!(request_path("*"), None);
    }

    #[tokio::test]
    async fn read_head_stops_at_blank_line() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(UPGRADE.as_bytes()).await.unwrap();
        let buf = read_head(&mut server, 16 * 1024).await.unwrap();
        assert_eq!(&buf[..], UPGRADE.as_bytes());
    }

    #[tokio::test]
    async fn read_head_limits_size() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(&[b'a'; 200]).await.unwrap();
        assert_eq!(read_head(&mut server, 64).await, Err(HeadError::TooLarge));
    }

    #[tokio::test]
    async fn read_head_reports_early_close() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        drop(client);
        assert_eq!(read_head(&mut server, 1024).await, Err(HeadError::Closed));
    }

    fn registry_with(path: &str) -> Arc<EndpointRegistry> {
        let registry = EndpointRegistry::new();
        registry
            .insert(Endpoint::new(
                Endpoint::builder(path).build(),
                1,
                Arc::new(GatewayConfig::local()),
                CancellationToken::new(),
                TaskTracker::new(),
            ))
            .unwrap();
        Arc::new(registry)
    }

    async fn route_raw(request: &[u8], registry: Arc<EndpointRegistry>) -> Vec<u8> {
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(request).await.unwrap();
        let _ = tokio::spawn(route_connection(
            server,
            "127.0.0.1:5000".parse().unwrap(),
            1,
            registry,
            Arc::new(GatewayConfig::local()),
            CancellationToken::new(),
        ));
        // A successful upgrade keeps the stream open, so bound the read.
        let mut out = Vec::new();
        let _ = tokio::time::timeout(Duration::from_millis(500), client.read_to_end(&mut out)).await;
        out
    }

    #[tokio::test]
    async fn miss_writes_nothing() {
        let out = route_raw(UPGRADE.as_bytes(), registry_with("/dashboard")).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn url_in_query_still_routes() {
        let request = UPGRADE.replace("/monitor?token=1", "/monitor?next=http://x");
        let out = route_raw(request.as_bytes(), registry_with("/monitor")).await;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 101"), "got {text}");
    }

    #[tokio::test]
    async fn malformed_gets_400() {
        let out = route_raw(b"NONSENSE\r\n\r\n", registry_with("/monitor")).await;
        assert!(out.starts_with(b"HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn plain_http_on_known_path_gets_426() {
        let out = route_raw(
            b"GET /monitor HTTP/1.1\r\nHost: x\r\n\r\n",
            registry_with("/monitor"),
        )
        .await;
        assert!(out.starts_with(b"HTTP/1.1 426"));
    }

    #[tokio::test]
    async fn match_completes_handshake() {
        let out = route_raw(UPGRADE.as_bytes(), registry_with("/monitor")).await;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 101"), "got {text}");
    }

    #[tokio::test]
    async fn cancelled_router_drops_silently() {
        let (client, server) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();
        route_connection(
            server,
            "127.0.0.1:5000".parse().unwrap(),
            1,
            registry_with("/monitor"),
            Arc::new(GatewayConfig::local()),
            cancel,
        )
        .await;
        drop(client);
    }
}
