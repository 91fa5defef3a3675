//! WebSocket sessions: connection state, heartbeat and the session runner.

pub mod connection;
pub mod heartbeat;
pub(crate) mod session;

pub use connection::{Connection, SessionInfo};
pub use heartbeat::{HeartbeatResult, run_heartbeat};
