//! Frame dispatch: handlers, their registry, error presentation and the
//! per-session dispatch loop.

pub mod handler;
pub mod pipeline;
pub mod presenter;
pub mod registry;

pub use handler::{FrameHandler, Reply, ReplyStream, no_reply};
pub use pipeline::{MessageParser, default_parser};
pub use presenter::{ErrorFramePresenter, ErrorPresenter, SilentPresenter};
pub use registry::HandlerRegistry;
