//! # marquee-server
//!
//! Real-time connection multiplexing for the Marquee signage platform.
//!
//! - Listener registry: one shared TCP listener per port, bound lazily or
//!   supplied by the caller
//! - Endpoint registry: logical endpoints keyed by `(port, path)`
//! - Upgrade router: exact-path routing of upgrade requests; misses are
//!   dropped without a response
//! - Sessions: greeting, ordered frame dispatch, heartbeat, server push
//! - Graceful shutdown via `CancellationToken` + `TaskTracker`

#![deny(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod errors;
pub mod gateway;
pub mod handshake;
pub mod listener;
pub(crate) mod router;
pub mod shutdown;
pub mod websocket;

pub use config::GatewayConfig;
pub use dispatch::{ErrorFramePresenter, ErrorPresenter, FrameHandler, Reply, ReplyStream};
pub use endpoint::{Endpoint, EndpointBuilder, EndpointDefinition, normalize_path};
pub use errors::{GatewayError, Result};
pub use gateway::Gateway;
pub use listener::ListenerSource;
pub use websocket::SessionInfo;
