//! # marquee-settings
//!
//! Layered configuration for the Marquee gateway: compiled defaults, then an
//! optional `~/.marquee/settings.json`, then `MARQUEE_*` environment variables.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::{EndpointSettings, GatewaySettings, LoggingSettings, MarqueeSettings};
