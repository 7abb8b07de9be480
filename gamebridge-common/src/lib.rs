//! Common utilities and types for GameBridge

pub mod config;
pub mod constants;
pub mod error;
pub mod time;

pub use config::{BridgeConfig, LimitsConfig, QueuesConfig, ServerConfig, TimeoutsConfig, TlsConfig};
pub use constants::{DEFAULT_BRIDGE_BIND, DEFAULT_BRIDGE_PORT};
pub use error::{BridgeError, Result};
pub use time::{mono_ms, wall_unix_ms};
