//! # marquee-core
//!
//! Shared vocabulary for the Marquee real-time gateway:
//!
//! - **Branded IDs**: [`ConnectionId`] as a newtype for type safety
//! - **Frames**: [`Frame`], the `{ event, data }` JSON unit exchanged with peers
//! - **Errors**: [`HandlerError`], the failure type frame handlers return
//! - **Paths**: [`normalize_path`], the canonical form of an endpoint path
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod errors;
pub mod frame;
pub mod ids;
pub mod logging;
pub mod path;

pub use errors::HandlerError;
pub use frame::{CONNECTED_EVENT, ERROR_EVENT, Frame};
pub use ids::ConnectionId;
pub use path::normalize_path;
