//! Gateway configuration.

use std::time::Duration;

use marquee_settings::GatewaySettings;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

/// Connection-level configuration shared by every listener, endpoint and
/// session of one [`Gateway`](crate::Gateway).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host the gateway binds its own listeners on (default `"0.0.0.0"`).
    pub host: String,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per session.
    pub send_queue_capacity: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Heartbeat timeout in seconds (close after this long without traffic).
    pub heartbeat_timeout_secs: u64,
    /// Time allowed for reading the upgrade request head and completing the
    /// handshake, in seconds.
    pub handshake_timeout_secs: u64,
    /// Largest accepted upgrade request head in bytes.
    pub max_request_head_bytes: usize,
    /// How long `dispose` waits for sessions to finish, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&GatewaySettings::default())
    }
}

impl From<&GatewaySettings> for GatewayConfig {
    fn from(settings: &GatewaySettings) -> Self {
        Self {
            host: settings.host.clone(),
            max_message_size: settings.max_message_size,
            send_queue_capacity: settings.send_queue_capacity.max(1),
            heartbeat_interval_secs: settings.heartbeat_interval_secs,
            heartbeat_timeout_secs: settings.heartbeat_timeout_secs,
            handshake_timeout_secs: settings.handshake_timeout_secs,
            max_request_head_bytes: settings.max_request_head_bytes,
            shutdown_timeout_secs: settings.shutdown_timeout_secs,
        }
    }
}

impl GatewayConfig {
    /// Config for listeners bound on the loopback interface.
    pub fn local() -> Self {
        Self {
            host: "127.0.0.1".into(),
            ..Self::default()
        }
    }

    /// Interval between server pings.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Silence after which a session is closed.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs.max(1))
    }

    /// Bound on reading the request head and on the handshake itself.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs.max(1))
    }

    /// Bound on draining sessions during `dispose`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// WebSocket protocol settings applied to every accepted connection.
    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }
}
