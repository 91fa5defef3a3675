//! Failure type for frame handlers.
//!
//! A handler failure never ends the session. The dispatch pipeline hands it
//! to an error presenter, which decides what (if anything) the peer sees.

use thiserror::Error;

/// Error returned (or yielded mid-sequence) by a frame handler.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The frame's `data` did not match what the handler expects.
    #[error("invalid data: {message}")]
    InvalidData {
        /// What was wrong with the payload.
        message: String,
    },

    /// The handler ran and reported a business-level failure.
    #[error("{message}")]
    Failed {
        /// Human-readable message shown to the peer.
        message: String,
    },

    /// The handler panicked.
    #[error("internal error")]
    Panicked,

    /// A produced value could not be serialized.
    #[error("failed to serialize reply: {message}")]
    Serialize {
        /// Serializer error text.
        message: String,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Shorthand for [`HandlerError::InvalidData`].
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidData { .. } => "invalid_data",
            Self::Failed { .. } => "failed",
            Self::Panicked => "panicked",
            Self::Serialize { .. } => "serialize",
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn failed_displays_message_verbatim() {
        let err = HandlerError::failed("wallet not found");
        assert_eq!(err.to_string(), "wallet not found");
    }

    #[test]
    fn invalid_data_display() {
        let err = HandlerError::invalid_data("expected a number");
        assert_eq!(err.to_string(), "invalid data: expected a number");
    }

    #[test]
    fn panicked_hides_details() {
        assert_eq!(HandlerError::Panicked.to_string(), "internal error");
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(HandlerError::failed("x").error_kind(), "failed");
        assert_eq!(HandlerError::invalid_data("x").error_kind(), "invalid_data");
        assert_eq!(HandlerError::Panicked.error_kind(), "panicked");
    }

    #[test]
    fn from_serde_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: HandlerError = json_err.into();
        assert_matches!(err, HandlerError::Serialize { .. });
    }
}
