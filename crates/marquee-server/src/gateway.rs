//! The gateway: owns the listener and endpoint registries for one process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::config::GatewayConfig;
use crate::endpoint::registry::EndpointRegistry;
use crate::endpoint::{Endpoint, EndpointDefinition};
use crate::errors::{GatewayError, Result};
use crate::listener::{AcceptContext, ListenerRegistry, ListenerSource};
use crate::shutdown::ShutdownCoordinator;

/// Multiplexes WebSocket endpoints over shared per-port listeners.
///
/// ```ignore
/// let gateway = Gateway::new(GatewayConfig::default());
/// let monitors = gateway
///     .register_endpoint(9400, Endpoint::builder("/monitor").on("ping", ping).build())
///     .await?;
/// // ...
/// gateway.dispose().await;
/// ```
pub struct Gateway {
    config: Arc<GatewayConfig>,
    listeners: ListenerRegistry,
    endpoints: Arc<EndpointRegistry>,
    shutdown: ShutdownCoordinator,
    disposed: AtomicBool,
}

impl Gateway {
    /// Create a gateway. Nothing is bound until an endpoint is registered.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: Arc::new(config),
            listeners: ListenerRegistry::new(),
            endpoints: Arc::new(EndpointRegistry::new()),
            shutdown: ShutdownCoordinator::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Supply an already-bound listener for `port`.
    ///
    /// It is used instead of binding when the first endpoint on `port` is
    /// registered, and is left open by [`dispose`](Self::dispose).
    pub async fn attach_listener(&self, port: u16, listener: Arc<TcpListener>) -> Result<()> {
        self.ensure_live()?;
        self.listeners.attach(port, listener).await
    }

    /// Register an endpoint on `port`, starting the port's listener if
    /// needed.
    ///
    /// Fails with [`GatewayError::DuplicateEndpoint`] if the normalized path
    /// is already registered on `port`, and with [`GatewayError::Bind`] if
    /// the port cannot be bound.
    #[instrument(skip_all, fields(port = port, path = %definition.path()))]
    pub async fn register_endpoint(
        &self,
        port: u16,
        definition: EndpointDefinition,
    ) -> Result<Endpoint> {
        self.ensure_live()?;
        if self.endpoints.contains(port, definition.path()) {
            return Err(GatewayError::DuplicateEndpoint {
                port,
                path: definition.path().to_owned(),
            });
        }

        let ctx = AcceptContext {
            endpoints: self.endpoints.clone(),
            config: self.config.clone(),
            cancel: self.shutdown.token(),
            tracker: self.shutdown.tracker(),
        };
        let local_addr = self.listeners.ensure(port, &ctx).await?;

        let endpoint = Endpoint::new(
            definition,
            port,
            self.config.clone(),
            self.shutdown.child_token(),
            self.shutdown.tracker(),
        );
        self.endpoints.insert(endpoint.clone())?;
        if self.is_disposed() {
            let _ = self.endpoints.remove(port, endpoint.path());
            endpoint.close();
            return Err(GatewayError::Disposed);
        }

        info!(%local_addr, events = ?endpoint.events(), "endpoint registered");
        Ok(endpoint)
    }

    /// Bound address of the listener for `port`.
    ///
    /// For port `0` this reports the ephemeral port the OS picked.
    pub async fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.listeners.local_addr(port).await
    }

    /// Whether the listener for `port` was bound by the gateway or supplied.
    pub async fn listener_source(&self, port: u16) -> Option<ListenerSource> {
        self.listeners.source(port).await
    }

    /// Paths registered on `port`, in registration order.
    pub fn paths(&self, port: u16) -> Vec<String> {
        self.endpoints.paths(port)
    }

    /// Remove an endpoint from routing and close its sessions.
    ///
    /// The port's listener stays up. Returns `false` if no such endpoint.
    pub fn close_endpoint(&self, port: u16, path: &str) -> bool {
        let path = crate::endpoint::normalize_path(path);
        match self.endpoints.remove(port, &path) {
            Some(endpoint) => {
                endpoint.close();
                true
            }
            None => false,
        }
    }

    /// Shut everything down. Idempotent.
    ///
    /// Stops every accept loop and session, closes the listeners the gateway
    /// bound (attached ones stay open), clears both registries, then waits up
    /// to the configured shutdown timeout for sessions to finish.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("disposing gateway");
        self.shutdown.shutdown();

        let accept_loops = self.listeners.drain().await;
        self.shutdown.join_accept_loops(accept_loops).await;

        let endpoints = self.endpoints.clear();
        for endpoint in &endpoints {
            endpoint.close();
        }

        let _ = self.shutdown.drain(self.config.shutdown_timeout()).await;
        info!(endpoints = endpoints.len(), "gateway disposed");
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(GatewayError::Disposed)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use marquee_core::HandlerError;
    use serde_json::Value;

    fn gateway() -> Gateway {
        Gateway::new(GatewayConfig::local())
    }

    #[tokio::test]
    async fn register_binds_ephemeral_port() {
        let gw = gateway();
        let endpoint = gw
            .register_endpoint(0, Endpoint::builder("/monitor").build())
            .await
            .unwrap();
        assert_eq!(endpoint.path(), "/monitor");
        let addr = gw.local_addr(0).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(gw.listener_source(0).await, Some(ListenerSource::Owned));
        gw.dispose().await;
    }

    #[tokio::test]
    async fn endpoints_share_one_listener() {
        let gw = gateway();
        let _ = gw
            .register_endpoint(0, Endpoint::builder("/monitor").build())
            .await
            .unwrap();
        let first = gw.local_addr(0).await.unwrap();
        let _ = gw
            .register_endpoint(0, Endpoint::builder("/dashboard").build())
            .await
            .unwrap();
        assert_eq!(gw.local_addr(0).await.unwrap(), first);
        assert_eq!(gw.paths(0), vec!["/monitor", "/dashboard"]);
        gw.dispose().await;
    }

    #[tokio::test]
    async fn duplicate_after_normalization_rejected() {
        let gw = gateway();
        let _ = gw
            .register_endpoint(0, Endpoint::builder("/monitor").build())
            .await
            .unwrap();
        let err = gw
            .register_endpoint(0, Endpoint::builder("monitor//").build())
            .await
            .unwrap_err();
        assert_matches!(err, GatewayError::DuplicateEndpoint { port: 0, ref path } if path == "/monitor");
        gw.dispose().await;
    }

    #[tokio::test]
    async fn close_endpoint_removes_route() {
        let gw = gateway();
        let endpoint = gw
            .register_endpoint(
                0,
                Endpoint::builder("/monitor")
                    .on("ping", |_: Value, _| async { Ok::<_, HandlerError>("pong") })
                    .build(),
            )
            .await
            .unwrap();
        assert!(gw.close_endpoint(0, "monitor/"));
        assert!(endpoint.is_closed());
        assert!(gw.paths(0).is_empty());
        assert!(!gw.close_endpoint(0, "/monitor"));
        gw.dispose().await;
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_final() {
        let gw = gateway();
        let endpoint = gw
            .register_endpoint(0, Endpoint::builder("/monitor").build())
            .await
            .unwrap();
        gw.dispose().await;
        gw.dispose().await;
        assert!(gw.is_disposed());
        assert!(endpoint.is_closed());
        assert!(gw.paths(0).is_empty());
        assert!(gw.local_addr(0).await.is_none());

        let err = gw
            .register_endpoint(0, Endpoint::builder("/again").build())
            .await
            .unwrap_err();
        assert_matches!(err, GatewayError::Disposed);
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await.unwrap());
        assert_matches!(
            gw.attach_listener(1, listener).await,
            Err(GatewayError::Disposed)
        );
    }
}
