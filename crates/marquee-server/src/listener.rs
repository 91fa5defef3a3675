//! Shared per-port listeners and their accept loops.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::endpoint::registry::EndpointRegistry;
use crate::errors::{GatewayError, Result};
use crate::router;

/// Pause after a failed `accept` so a persistent error (e.g. fd exhaustion)
/// does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Who is responsible for closing a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerSource {
    /// Bound by the gateway; closed on dispose.
    Owned,
    /// Handed in by the caller; left open on dispose.
    External,
}

struct ListenerEntry {
    local_addr: SocketAddr,
    source: ListenerSource,
    accept_loop: JoinHandle<()>,
}

#[derive(Default)]
struct Listeners {
    active: HashMap<u16, ListenerEntry>,
    attached: HashMap<u16, Arc<TcpListener>>,
}

/// Everything an accept loop needs besides its listener.
#[derive(Clone)]
pub(crate) struct AcceptContext {
    pub(crate) endpoints: Arc<EndpointRegistry>,
    pub(crate) config: Arc<GatewayConfig>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

/// One listener per logical port.
///
/// Guarded by an async mutex so concurrent registrations for the same port
/// bind it once.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    inner: Mutex<Listeners>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Supply an already-bound listener for `port`.
    pub(crate) async fn attach(&self, port: u16, listener: Arc<TcpListener>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.active.contains_key(&port) {
            return Err(GatewayError::Bind {
                port,
                source: std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "a listener is already active for this port",
                ),
            });
        }
        let _ = inner.attached.insert(port, listener);
        Ok(())
    }

    /// Make sure `port` has a running listener; returns its address.
    ///
    /// Reuses an active listener, else an attached one, else binds
    /// `host:port`. The accept loop starts when the listener is first
    /// registered.
    pub(crate) async fn ensure(&self, port: u16, ctx: &AcceptContext) -> Result<SocketAddr> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.active.get(&port) {
            return Ok(entry.local_addr);
        }

        let (listener, source) = match inner.attached.remove(&port) {
            Some(listener) => (listener, ListenerSource::External),
            None => {
                let addr = format!("{}:{port}", ctx.config.host);
                let listener = TcpListener::bind(&addr)
                    .await
                    .map_err(|source| GatewayError::Bind { port, source })?;
                (Arc::new(listener), ListenerSource::Owned)
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|source| GatewayError::Bind { port, source })?;

        info!(port, %local_addr, ?source, "listener started");
        let accept_loop = tokio::spawn(run_accept_loop(listener, port, ctx.clone()));
        let _ = inner.active.insert(
            port,
            ListenerEntry {
                local_addr,
                source,
                accept_loop,
            },
        );
        Ok(local_addr)
    }

    /// Bound address of the listener for `port`.
    pub(crate) async fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.inner.lock().await.active.get(&port).map(|e| e.local_addr)
    }

    /// Ownership of the listener for `port`.
    pub(crate) async fn source(&self, port: u16) -> Option<ListenerSource> {
        self.inner.lock().await.active.get(&port).map(|e| e.source)
    }

    /// Forget every listener, returning the accept loops to await.
    pub(crate) async fn drain(&self) -> Vec<JoinHandle<()>> {
        let mut inner = self.inner.lock().await;
        inner.attached.clear();
        inner
            .active
            .drain()
            .map(|(port, entry)| {
                debug!(port, source = ?entry.source, "releasing listener");
                entry.accept_loop
            })
            .collect()
    }
}

/// Accept connections until cancelled, routing each on its own task.
///
/// The loop holds one reference to the listener; an owned listener closes
/// when the loop returns.
async fn run_accept_loop(listener: Arc<TcpListener>, port: u16, ctx: AcceptContext) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, remote)) => {
                debug!(port, %remote, "accepted connection");
                let _ = ctx.tracker.spawn(router::route_connection(
                    stream,
                    remote,
                    port,
                    ctx.endpoints.clone(),
                    ctx.config.clone(),
                    ctx.cancel.clone(),
                ));
            }
            Err(e) => {
                warn!(port, error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
    debug!(port, "accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn context() -> AcceptContext {
        AcceptContext {
            endpoints: Arc::new(EndpointRegistry::new()),
            config: Arc::new(GatewayConfig::local()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    #[tokio::test]
    async fn ensure_binds_once_per_port() {
        let reg = ListenerRegistry::new();
        let ctx = context();
        let first = reg.ensure(0, &ctx).await.unwrap();
        let second = reg.ensure(0, &ctx).await.unwrap();
        assert_eq!(first, second);
        assert_ne!(first.port(), 0);
        assert_eq!(reg.source(0).await, Some(ListenerSource::Owned));
        ctx.cancel.cancel();
    }

    #[tokio::test]
    async fn attached_listener_is_used() {
        let reg = ListenerRegistry::new();
        let ctx = context();
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await.unwrap());
        let addr = listener.local_addr().unwrap();

        reg.attach(7, listener).await.unwrap();
        assert_eq!(reg.ensure(7, &ctx).await.unwrap(), addr);
        assert_eq!(reg.source(7).await, Some(ListenerSource::External));
        assert_eq!(reg.local_addr(7).await, Some(addr));
        ctx.cancel.cancel();
    }

    #[tokio::test]
    async fn attach_after_activation_fails() {
        let reg = ListenerRegistry::new();
        let ctx = context();
        let _ = reg.ensure(0, &ctx).await.unwrap();
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await.unwrap());
        assert_matches!(
            reg.attach(0, listener).await,
            Err(GatewayError::Bind { port: 0, .. })
        );
        ctx.cancel.cancel();
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let reg = ListenerRegistry::new();
        let err = reg.ensure(port, &context()).await.unwrap_err();
        assert_matches!(err, GatewayError::Bind { port: p, .. } if p == port);
        assert!(reg.local_addr(port).await.is_none());
    }

    #[tokio::test]
    async fn drain_stops_accept_loops() {
        let reg = ListenerRegistry::new();
        let ctx = context();
        let _ = reg.ensure(0, &ctx).await.unwrap();
        ctx.cancel.cancel();
        let handles = reg.drain().await;
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(reg.local_addr(0).await.is_none());
    }
}
