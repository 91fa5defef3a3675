//! Logical endpoints: a path on a port with its own handlers.
//!
//! An [`EndpointDefinition`] is built with [`Endpoint::builder`] and handed
//! to [`Gateway::register_endpoint`](crate::Gateway::register_endpoint),
//! which returns the live [`Endpoint`]. The endpoint never listens itself. It
//! completes handshakes on streams handed to it, either by the gateway's
//! router or directly by the caller via [`Endpoint::accept`].

pub(crate) mod registry;

use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::Stream;
use marquee_core::{ConnectionId, Frame, HandlerError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub use marquee_core::normalize_path;

use crate::config::GatewayConfig;
use crate::dispatch::handler::{StreamHandler, UnaryHandler};
use crate::dispatch::pipeline::Dispatcher;
use crate::dispatch::{
    ErrorFramePresenter, ErrorPresenter, FrameHandler, HandlerRegistry, MessageParser, Reply,
    default_parser,
};
use crate::errors::{GatewayError, Result};
use crate::handshake;
use crate::websocket::connection::{Connection, SessionInfo};
use crate::websocket::session;

/// Callback run when a session opens or closes.
pub type LifecycleHook = Arc<dyn Fn(&SessionInfo) + Send + Sync>;

/// Builder for an endpoint definition.
pub struct EndpointBuilder {
    path: String,
    handlers: HandlerRegistry,
    parser: Option<MessageParser>,
    presenter: Option<Arc<dyn ErrorPresenter>>,
    on_connect: Option<LifecycleHook>,
    on_disconnect: Option<LifecycleHook>,
}

impl EndpointBuilder {
    /// Handle `event` with an async function of the decoded `data`.
    ///
    /// A `data` payload that does not decode into `T` is a handler failure.
    /// The returned value is sent under the same event name; `null` sends
    /// nothing.
    #[must_use]
    pub fn on<T, R, Fut, F>(mut self, event: &str, f: F) -> Self
    where
        F: Fn(T, SessionInfo) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
        R: Serialize + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        self.handlers.register(event, UnaryHandler::new(f));
        self
    }

    /// Handle `event` with a function returning a stream of replies.
    #[must_use]
    pub fn on_stream<T, S, F>(mut self, event: &str, f: F) -> Self
    where
        F: Fn(T, SessionInfo) -> S + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
        S: Stream<Item = Result<Reply, HandlerError>> + Send + 'static,
    {
        self.handlers.register(event, StreamHandler::new(f));
        self
    }

    /// Handle `event` with a raw [`FrameHandler`].
    #[must_use]
    pub fn register(mut self, event: &str, handler: impl FrameHandler) -> Self {
        self.handlers.register(event, handler);
        self
    }

    /// Replace the strict `{event, data}` decoder.
    #[must_use]
    pub fn message_parser(
        mut self,
        parser: impl Fn(&str) -> Option<Frame> + Send + Sync + 'static,
    ) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Replace the default `{"event":"error"}` presenter.
    #[must_use]
    pub fn error_presenter(mut self, presenter: impl ErrorPresenter) -> Self {
        self.presenter = Some(Arc::new(presenter));
        self
    }

    /// Run `hook` after each session's greeting is queued.
    #[must_use]
    pub fn on_connect(mut self, hook: impl Fn(&SessionInfo) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Run `hook` once each session has ended.
    #[must_use]
    pub fn on_disconnect(mut self, hook: impl Fn(&SessionInfo) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    /// Finish the definition.
    pub fn build(self) -> EndpointDefinition {
        EndpointDefinition {
            path: self.path,
            dispatcher: Dispatcher {
                handlers: self.handlers,
                parser: self.parser.unwrap_or_else(default_parser),
                presenter: self
                    .presenter
                    .unwrap_or_else(|| Arc::new(ErrorFramePresenter)),
            },
            on_connect: self.on_connect,
            on_disconnect: self.on_disconnect,
        }
    }
}

/// A fully described endpoint, ready to register.
pub struct EndpointDefinition {
    path: String,
    dispatcher: Dispatcher,
    on_connect: Option<LifecycleHook>,
    on_disconnect: Option<LifecycleHook>,
}

impl EndpointDefinition {
    /// Normalized path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Event names with handlers (sorted).
    pub fn events(&self) -> Vec<String> {
        self.dispatcher.handlers.events()
    }
}

/// State shared by an endpoint handle and its sessions.
pub(crate) struct EndpointShared {
    pub(crate) port: u16,
    pub(crate) path: String,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) on_connect: Option<LifecycleHook>,
    pub(crate) on_disconnect: Option<LifecycleHook>,
    pub(crate) sessions: DashMap<ConnectionId, Arc<Connection>>,
    pub(crate) config: Arc<GatewayConfig>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

impl EndpointShared {
    /// Run a lifecycle hook, containing panics.
    pub(crate) fn run_hook(&self, hook: Option<&LifecycleHook>, info: &SessionInfo, name: &str) {
        let Some(hook) = hook else { return };
        if std::panic::catch_unwind(AssertUnwindSafe(|| hook(info))).is_err() {
            warn!(conn_id = %info.id, path = %self.path, hook = name, "lifecycle hook panicked");
        }
    }
}

/// A registered endpoint: acceptor, session set and push handle.
///
/// Cheap to clone; all clones refer to the same endpoint.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<EndpointShared>,
}

impl Endpoint {
    /// Start defining an endpoint at `path` (normalized).
    pub fn builder(path: &str) -> EndpointBuilder {
        EndpointBuilder {
            path: normalize_path(path),
            handlers: HandlerRegistry::new(),
            parser: None,
            presenter: None,
            on_connect: None,
            on_disconnect: None,
        }
    }

    pub(crate) fn new(
        definition: EndpointDefinition,
        port: u16,
        config: Arc<GatewayConfig>,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            shared: Arc::new(EndpointShared {
                port,
                path: definition.path,
                dispatcher: definition.dispatcher,
                on_connect: definition.on_connect,
                on_disconnect: definition.on_disconnect,
                sessions: DashMap::new(),
                config,
                cancel,
                tracker,
            }),
        }
    }

    /// Logical port the endpoint is registered on.
    pub fn port(&self) -> u16 {
        self.shared.port
    }

    /// Normalized path.
    pub fn path(&self) -> &str {
        &self.shared.path
    }

    /// Event names with handlers (sorted).
    pub fn events(&self) -> Vec<String> {
        self.shared.dispatcher.handlers.events()
    }

    /// Complete a WebSocket handshake on `stream` and start a session.
    ///
    /// The request path is not checked here; callers that route by path do
    /// so before handing the stream over.
    pub async fn accept<S>(&self, stream: S, remote: SocketAddr) -> Result<ConnectionId>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.is_closed() {
            return Err(GatewayError::Disposed);
        }
        let ws = handshake::accept(stream, &self.shared.config).await?;

        let info = SessionInfo {
            id: ConnectionId::new(),
            remote,
            port: self.shared.port,
            path: self.shared.path.clone(),
        };
        let id = info.id.clone();
        let _ = self
            .shared
            .tracker
            .spawn(session::run_session(ws, self.shared.clone(), info));
        Ok(id)
    }

    /// Push a frame to one session. Returns `false` if it is gone, closed or
    /// its queue is full.
    pub fn send_to(&self, id: &ConnectionId, frame: &Frame) -> bool {
        self.shared
            .sessions
            .get(id)
            .is_some_and(|conn| conn.push(frame))
    }

    /// Push a frame to every open session. Returns how many accepted it.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let delivered = self
            .shared
            .sessions
            .iter()
            .filter(|entry| entry.value().push(frame))
            .count();
        debug!(
            path = %self.shared.path,
            event = %frame.event,
            recipients = delivered,
            "broadcast frame"
        );
        delivered
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// IDs of live sessions.
    pub fn session_ids(&self) -> Vec<ConnectionId> {
        self.shared
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Close the endpoint and all of its sessions. Idempotent.
    pub fn close(&self) {
        if !self.shared.cancel.is_cancelled() {
            info!(port = self.shared.port, path = %self.shared.path, "closing endpoint");
        }
        self.shared.cancel.cancel();
    }

    /// Whether the endpoint has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("port", &self.shared.port)
            .field("path", &self.shared.path)
            .field("sessions", &self.shared.sessions.len())
            .finish_non_exhaustive()
    }
}
