//! Built-in signage endpoints.
//!
//! Monitors (display devices) register themselves and report playback;
//! dashboards (browsers) publish playlists, which are pushed to every
//! connected monitor.

use marquee_core::{Frame, HandlerError};
use marquee_server::{Endpoint, EndpointDefinition, SessionInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

/// Event pushed to monitors when a dashboard publishes a playlist.
pub const PLAYLIST_UPDATED: &str = "playlist.updated";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Register {
    monitor_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Registered {
    monitor_id: String,
    connection_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackReport {
    playlist_id: String,
    item_index: u32,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct Playlist {
    playlist_id: String,
    items: Vec<String>,
}

/// The endpoint display devices connect to.
pub fn monitor_endpoint(path: &str) -> EndpointDefinition {
    Endpoint::builder(path)
        .on("ping", |_: Value, _| async { Ok::<_, HandlerError>("pong") })
        .on("register", |req: Register, session: SessionInfo| async move {
            info!(monitor_id = %req.monitor_id, conn_id = %session.id, "monitor registered");
            Ok::<_, HandlerError>(Registered {
                monitor_id: req.monitor_id,
                connection_id: session.id.to_string(),
            })
        })
        .on("playback.report", |report: PlaybackReport, session: SessionInfo| async move {
            info!(
                conn_id = %session.id,
                playlist_id = %report.playlist_id,
                item_index = report.item_index,
                "playback report"
            );
            Ok::<_, HandlerError>(Value::Null)
        })
        .build()
}

/// The endpoint browser dashboards connect to.
///
/// `monitors` is the live monitor endpoint that published playlists are
/// pushed to.
pub fn dashboard_endpoint(path: &str, monitors: Endpoint) -> EndpointDefinition {
    let counted = monitors.clone();
    Endpoint::builder(path)
        .on("ping", |_: Value, _| async { Ok::<_, HandlerError>("pong") })
        .on("monitors.count", move |_: Value, _| {
            let count = counted.session_count();
            async move { Ok::<_, HandlerError>(json!({ "online": count })) }
        })
        .on("playlist.publish", move |playlist: Playlist, _| {
            let monitors = monitors.clone();
            async move {
                if playlist.items.is_empty() {
                    return Err(HandlerError::invalid_data("playlist has no items"));
                }
                let frame = Frame::new(PLAYLIST_UPDATED, serde_json::to_value(&playlist)?);
                let delivered = monitors.broadcast(&frame);
                info!(playlist_id = %playlist.playlist_id, delivered, "playlist published");
                Ok(json!({ "delivered": delivered }))
            }
        })
        .build()
}
