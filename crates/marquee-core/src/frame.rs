//! The `{ "event": string, "data": any }` wire unit.
//!
//! Every message in both directions is one UTF-8 JSON text message of this
//! shape. Decoding is strict: both keys must be present and `event` must be a
//! string. Anything else is rejected and the caller drops the message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name of the greeting sent to every newly accepted connection.
pub const CONNECTED_EVENT: &str = "connected";

/// Event name used by the default error presenter.
pub const ERROR_EVENT: &str = "error";

/// A single wire frame.
///
/// `data` is omitted from the encoded form when it is `null`, so the greeting
/// encodes as exactly `{"event":"connected"}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Frame {
    /// Logical event name used to pick a handler.
    pub event: String,
    /// Event payload.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Strict inbound shape; `data` has no default so a missing key fails.
#[derive(Deserialize)]
struct WireFrame {
    event: String,
    data: Value,
}

impl Frame {
    /// Create a frame.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// The `{"event":"connected"}` greeting.
    #[must_use]
    pub fn connected() -> Self {
        Self::new(CONNECTED_EVENT, Value::Null)
    }

    /// Decode an inbound text message.
    ///
    /// Returns `None` for malformed JSON, non-object JSON, a missing or
    /// non-string `event`, or a missing `data` key.
    #[must_use]
    pub fn decode(text: &str) -> Option<Self> {
        let wire: WireFrame = serde_json::from_str(text).ok()?;
        Some(Self {
            event: wire.event,
            data: wire.data,
        })
    }

    /// Encode to the JSON text sent on the wire.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
