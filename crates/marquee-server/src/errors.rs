//! Gateway error types.

use thiserror::Error;

/// Errors surfaced by the gateway's registration and acceptance APIs.
///
/// Per-connection problems (bad frames, routing misses, handler failures)
/// never appear here; they are logged and contained to their connection.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Binding the listener for a port failed.
    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        /// Logical port that was being registered.
        port: u16,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// An endpoint with the same normalized path already exists on the port.
    #[error("endpoint {path} is already registered on port {port}")]
    DuplicateEndpoint {
        /// Port of the conflicting registration.
        port: u16,
        /// Normalized path of the conflicting registration.
        path: String,
    },

    /// The gateway (or the endpoint) has been shut down.
    #[error("gateway has been disposed")]
    Disposed,

    /// The WebSocket handshake failed.
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer did not complete the handshake in time.
    #[error("websocket handshake timed out")]
    HandshakeTimeout,
}

impl GatewayError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind",
            Self::DuplicateEndpoint { .. } => "duplicate_endpoint",
            Self::Disposed => "disposed",
            Self::Handshake(_) => "handshake",
            Self::HandshakeTimeout => "handshake_timeout",
        }
    }
}

/// Result alias for gateway operations.
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn bind_display_includes_port() {
        let err = GatewayError::Bind {
            port: 9400,
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        };
        let msg = err.to_string();
        assert!(msg.contains("9400"));
        assert!(msg.contains("address in use"));
        assert_eq!(err.error_kind(), "bind");
    }

    #[test]
    fn duplicate_display() {
        let err = GatewayError::DuplicateEndpoint {
            port: 1,
            path: "/monitor".into(),
        };
        assert_eq!(err.to_string(), "endpoint /monitor is already registered on port 1");
    }

    #[test]
    fn from_tungstenite() {
        let err: GatewayError = tokio_tungstenite::tungstenite::Error::ConnectionClosed.into();
        assert_matches!(err, GatewayError::Handshake(_));
        assert_eq!(err.error_kind(), "handshake");
    }
}
