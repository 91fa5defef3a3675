//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may be partial: missing fields keep their compiled default.

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "gateway": { "host": "0.0.0.0", "heartbeatIntervalSecs": 15 },
///   "endpoints": { "port": 9400, "monitorPath": "/monitor" },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarqueeSettings {
    /// Connection-level gateway tuning.
    pub gateway: GatewaySettings,
    /// Where the built-in endpoints are exposed.
    pub endpoints: EndpointSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Connection-level gateway tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Bind address for listeners the gateway creates itself.
    pub host: String,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per session before writers wait.
    pub send_queue_capacity: usize,
    /// Interval between server pings.
    pub heartbeat_interval_secs: u64,
    /// Close a session after this long without any inbound traffic.
    pub heartbeat_timeout_secs: u64,
    /// Time allowed for a peer to send its upgrade request head.
    pub handshake_timeout_secs: u64,
    /// Largest accepted upgrade request head in bytes.
    pub max_request_head_bytes: usize,
    /// How long `dispose` waits for sessions to wind down.
    pub shutdown_timeout_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            handshake_timeout_secs: 10,
            max_request_head_bytes: 16 * 1024,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Where the built-in signage endpoints are exposed.
///
/// Monitors (display devices) and dashboards (browsers) share one port by
/// default and are told apart by path.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointSettings {
    /// Port shared by both endpoints.
    pub port: u16,
    /// Path for display device connections.
    pub monitor_path: String,
    /// Path for browser dashboard connections.
    pub dashboard_path: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            port: 9400,
            monitor_path: "/monitor".to_string(),
            dashboard_path: "/dashboard".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
