//! Per-session dispatch loop.
//!
//! Inbound messages are taken one at a time from the session's ordered queue.
//! Each is decoded, routed to the handler for its event name, and every reply
//! the handler yields is written before the next message is taken, so replies
//! leave in the order their frames arrived.
//!
//! Closing the connection stops the writes, not the handler: whatever is left
//! of an in-flight reply stream is moved onto the endpoint's task tracker and
//! run to completion with its output discarded.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use marquee_core::{Frame, HandlerError};
use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, warn};

use super::handler::ReplyStream;
use super::presenter::ErrorPresenter;
use super::registry::HandlerRegistry;
use crate::websocket::connection::Connection;

/// Decodes one inbound text message into a frame; `None` drops it.
pub type MessageParser = Arc<dyn Fn(&str) -> Option<Frame> + Send + Sync>;

/// The strict `{event, data}` decoder.
pub fn default_parser() -> MessageParser {
    Arc::new(Frame::decode)
}

/// An endpoint's frame-handling configuration.
pub(crate) struct Dispatcher {
    pub(crate) handlers: HandlerRegistry,
    pub(crate) parser: MessageParser,
    pub(crate) presenter: Arc<dyn ErrorPresenter>,
}

impl Dispatcher {
    /// Consume `inbound` until it ends or the connection closes.
    ///
    /// Reply streams cut off by a close are finished on `tracker`.
    pub(crate) async fn run(
        &self,
        conn: &Connection,
        mut inbound: mpsc::Receiver<String>,
        tracker: &TaskTracker,
    ) {
        loop {
            let text = tokio::select! {
                biased;
                () = conn.closed() => break,
                msg = inbound.recv() => match msg {
                    Some(text) => text,
                    None => break,
                },
            };
            self.dispatch(conn, &text, tracker).await;
        }
    }

    /// Handle one inbound message to completion.
    pub(crate) async fn dispatch(&self, conn: &Connection, text: &str, tracker: &TaskTracker) {
        let Some(frame) = (self.parser)(text) else {
            counter!("ws_frames_dropped_total", "reason" => "decode").increment(1);
            debug!(conn_id = %conn.id(), len = text.len(), "dropping undecodable message");
            return;
        };

        let Some(handler) = self.handlers.get(&frame.event) else {
            debug!(conn_id = %conn.id(), event = %frame.event, "no handler for event");
            return;
        };

        let info = conn.info().clone();
        let called = std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(frame.data, info)));
        let mut replies: ReplyStream = match called {
            Ok(replies) => replies,
            Err(_) => {
                self.fail(conn, &frame.event, &HandlerError::Panicked).await;
                return;
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                () = conn.closed() => {
                    finish_detached(conn, &frame.event, replies, tracker);
                    return;
                }
                next = AssertUnwindSafe(replies.next()).catch_unwind() => next,
            };
            match next {
                Ok(None) => break,
                Ok(Some(Ok(reply))) => {
                    if reply.data.is_null() {
                        continue;
                    }
                    let event = reply.event.unwrap_or_else(|| frame.event.clone());
                    if !conn.send_frame(&Frame::new(event, reply.data)).await {
                        finish_detached(conn, &frame.event, replies, tracker);
                        return;
                    }
                }
                Ok(Some(Err(err))) => {
                    self.fail(conn, &frame.event, &err).await;
                    break;
                }
                Err(_) => {
                    self.fail(conn, &frame.event, &HandlerError::Panicked).await;
                    break;
                }
            }
        }
    }

    async fn fail(&self, conn: &Connection, event: &str, err: &HandlerError) {
        counter!("ws_handler_errors_total", "kind" => err.error_kind()).increment(1);
        warn!(conn_id = %conn.id(), event, error = %err, "handler failed");

        let Some(value) = self.presenter.present(event, err, conn.info()) else {
            return;
        };
        match serde_json::to_string(&value) {
            Ok(text) => {
                let _ = conn.send_text(text).await;
            }
            Err(e) => warn!(conn_id = %conn.id(), error = %e, "failed to encode error frame"),
        }
    }
}

/// Run the rest of a reply stream whose connection has closed.
///
/// Items are dropped. Nothing is written because the connection is gone.
fn finish_detached(conn: &Connection, event: &str, replies: ReplyStream, tracker: &TaskTracker) {
    let span = tracing::debug_span!("detached_handler", conn_id = %conn.id(), event);
    let _ = tracker.spawn(
        async move {
            let drained = AssertUnwindSafe(replies.fold(0usize, |n, _| async move { n + 1 }))
                .catch_unwind()
                .await;
            match drained {
                Ok(discarded) => debug!(discarded, "handler finished after close"),
                Err(_) => warn!("handler panicked after close"),
            }
        }
        .instrument(span),
    );
}
