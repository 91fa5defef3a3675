//! Per-connection state shared by a session's tasks.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use marquee_core::{ConnectionId, Frame};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::warn;

/// Identity of a connection, handed to handlers and lifecycle hooks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Peer socket address.
    pub remote: SocketAddr,
    /// Logical port the connection arrived on.
    pub port: u16,
    /// Normalized path of the endpoint that accepted it.
    pub path: String,
}

/// Item on a session's outbound queue.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outbound {
    /// Encoded JSON text message.
    Text(String),
    /// Server-initiated ping.
    Ping,
}

/// A live connection.
///
/// All outbound traffic goes through the bounded queue drained by the
/// session's writer task, so writes from the dispatch loop and from server
/// pushes keep a single order on the wire. Once the connection is closed every
/// send is discarded.
pub struct Connection {
    info: SessionInfo,
    tx: mpsc::Sender<Outbound>,
    open: AtomicBool,
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    dropped_frames: AtomicU64,
    cancel: CancellationToken,
}

impl Connection {
    pub(crate) fn new(
        info: SessionInfo,
        tx: mpsc::Sender<Outbound>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            info,
            tx,
            open: AtomicBool::new(true),
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(Instant::now()),
            dropped_frames: AtomicU64::new(0),
            cancel,
        }
    }

    /// Connection identity.
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.info.id
    }

    /// Whether the connection still accepts writes.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.cancel.cancel();
    }

    /// Resolves once the connection is closed.
    pub(crate) fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Queue an encoded message, waiting for queue space.
    ///
    /// Returns `false` (and discards the message) if the connection is or
    /// becomes closed first.
    pub(crate) async fn send_text(&self, text: String) -> bool {
        if !self.is_open() {
            self.record_drop("closed");
            return false;
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.record_drop("closed");
                false
            }
            res = self.tx.send(Outbound::Text(text)) => {
                if res.is_err() {
                    self.record_drop("closed");
                }
                res.is_ok()
            }
        }
    }

    /// Encode and queue a frame, waiting for queue space.
    pub(crate) async fn send_frame(&self, frame: &Frame) -> bool {
        match frame.encode() {
            Ok(text) => self.send_text(text).await,
            Err(e) => {
                warn!(conn_id = %self.info.id, error = %e, "failed to encode frame");
                false
            }
        }
    }

    /// Queue a frame without waiting.
    ///
    /// Used for server pushes from outside the session. Returns `false` if the
    /// connection is closed or its queue is full.
    pub fn push(&self, frame: &Frame) -> bool {
        if !self.is_open() {
            self.record_drop("closed");
            return false;
        }
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(conn_id = %self.info.id, error = %e, "failed to encode frame");
                return false;
            }
        };
        if self.tx.try_send(Outbound::Text(text)).is_ok() {
            true
        } else {
            self.record_drop("queue_full");
            false
        }
    }

    /// Queue a ping. A full queue skips this round.
    pub(crate) fn ping(&self) -> bool {
        self.is_open() && self.tx.try_send(Outbound::Ping).is_ok()
    }

    /// Total frames discarded for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (any inbound traffic).
    pub(crate) fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the peer was heard from since the last check.
    pub(crate) fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last inbound traffic.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    fn record_drop(&self, reason: &'static str) {
        let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        counter!("ws_frames_dropped_total", "reason" => reason).increment(1);
    }
}
