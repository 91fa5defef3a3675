//! WebSocket session lifecycle: one accepted connection from handshake
//! through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use marquee_core::Frame;
use metrics::{counter, gauge, histogram};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{Instrument, debug, info, info_span, warn};

use super::connection::{Connection, Outbound, SessionInfo};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::endpoint::EndpointShared;

/// How long the writer spends on a close handshake before giving up.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Inbound messages buffered between the reader and the dispatch loop.
const INBOUND_QUEUE: usize = 64;

/// Run a session for an accepted connection.
///
/// 1. Queues the `{"event":"connected"}` greeting before anything else
/// 2. Spawns writer, reader and heartbeat tasks
/// 3. Dispatches inbound frames in arrival order until the connection closes
/// 4. Cleans up and runs the disconnect hook
pub(crate) async fn run_session<S>(
    ws: WebSocketStream<S>,
    endpoint: Arc<EndpointShared>,
    info: SessionInfo,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let span = info_span!("session", conn_id = %info.id, path = %info.path);
    session_inner(ws, endpoint, info).instrument(span).await;
}

async fn session_inner<S>(ws: WebSocketStream<S>, endpoint: Arc<EndpointShared>, info: SessionInfo)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = ws.split();
    let config = endpoint.config.clone();

    let cancel = endpoint.cancel.child_token();
    let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(config.send_queue_capacity);
    let connection = Arc::new(Connection::new(info.clone(), send_tx, cancel.clone()));

    let started = Instant::now();
    info!(remote = %info.remote, port = info.port, "client connected");
    counter!("ws_connections_total", "path" => info.path.clone()).increment(1);
    gauge!("ws_connections_active").increment(1.0);

    let _ = connection.send_frame(&Frame::connected()).await;
    let _ = endpoint
        .sessions
        .insert(info.id.clone(), connection.clone());
    endpoint.run_hook(endpoint.on_connect.as_ref(), &info, "on_connect");

    // Writer: drains the outbound queue in order.
    let writer_cancel = cancel.clone();
    let writer_conn = connection.clone();
    let writer = tokio::spawn(
        async move {
            loop {
                let item = tokio::select! {
                    biased;
                    () = writer_cancel.cancelled() => break,
                    item = send_rx.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                };
                let message = match item {
                    Outbound::Text(text) => Message::Text(text.into()),
                    Outbound::Ping => Message::Ping(Vec::new().into()),
                };
                let sent = tokio::select! {
                    biased;
                    () = writer_cancel.cancelled() => break,
                    res = ws_tx.send(message) => res,
                };
                if let Err(e) = sent {
                    debug!(error = %e, "write failed");
                    break;
                }
            }
            writer_conn.close();
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws_tx.close()).await;
        }
        .in_current_span(),
    );

    // Reader: feeds the ordered inbound queue; any traffic counts as liveness.
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(INBOUND_QUEUE);
    let reader_cancel = cancel.clone();
    let reader_conn = connection.clone();
    let reader = tokio::spawn(
        async move {
            loop {
                let msg = tokio::select! {
                    biased;
                    () = reader_cancel.cancelled() => break,
                    msg = ws_rx.next() => msg,
                };
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            reader_conn.mark_alive();
                            counter!("ws_frames_dropped_total", "reason" => "binary").increment(1);
                            debug!(len = data.len(), "dropping non-UTF8 binary message");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                        reader_conn.mark_alive();
                        continue;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("client sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "read failed");
                        break;
                    }
                    None => break,
                };
                reader_conn.mark_alive();
                let queued = tokio::select! {
                    biased;
                    () = reader_cancel.cancelled() => break,
                    res = inbound_tx.send(text) => res,
                };
                if queued.is_err() {
                    break;
                }
            }
            reader_conn.close();
        }
        .in_current_span(),
    );

    let heartbeat_conn = connection.clone();
    let heartbeat = tokio::spawn(
        {
            let interval = config.heartbeat_interval();
            let timeout = config.heartbeat_timeout();
            let cancel = cancel.clone();
            async move {
                if run_heartbeat(heartbeat_conn.clone(), interval, timeout, cancel).await
                    == HeartbeatResult::TimedOut
                {
                    warn!(
                        silent_secs = heartbeat_conn.last_seen_elapsed().as_secs(),
                        "client unresponsive, disconnecting"
                    );
                    heartbeat_conn.close();
                }
            }
        }
        .in_current_span(),
    );

    endpoint
        .dispatcher
        .run(&connection, inbound_rx, &endpoint.tracker)
        .await;

    // Clean up
    connection.close();
    let _ = reader.await;
    let _ = heartbeat.await;
    let _ = writer.await;

    let _ = endpoint.sessions.remove(&info.id);
    info!(
        remote = %info.remote,
        duration_secs = started.elapsed().as_secs_f64(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(started.elapsed().as_secs_f64());
    endpoint.run_hook(endpoint.on_disconnect.as_ref(), &info, "on_disconnect");
}
