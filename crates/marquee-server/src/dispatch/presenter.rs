//! Turning handler failures into something the peer sees.

use marquee_core::{ERROR_EVENT, HandlerError};
use serde_json::{Value, json};

use crate::websocket::connection::SessionInfo;

/// Decides what a peer receives when one of its frames fails.
///
/// Returning `None` keeps the failure server-side only. The returned value is
/// sent as-is, it does not have to be a `{event, data}` frame.
pub trait ErrorPresenter: Send + Sync + 'static {
    /// Present `error`, raised while handling a frame named `event`.
    fn present(&self, event: &str, error: &HandlerError, info: &SessionInfo) -> Option<Value>;
}

/// Default presenter: `{"event":"error","error":<message>}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorFramePresenter;

impl ErrorPresenter for ErrorFramePresenter {
    fn present(&self, _event: &str, error: &HandlerError, _info: &SessionInfo) -> Option<Value> {
        Some(json!({ "event": ERROR_EVENT, "error": error.to_string() }))
    }
}

/// Presenter that never tells the peer anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct SilentPresenter;

impl ErrorPresenter for SilentPresenter {
    fn present(&self, _event: &str, _error: &HandlerError, _info: &SessionInfo) -> Option<Value> {
        None
    }
}
