//! Configuration types for the bridge
//!
//! The TOML schema mirrors the recognized keys:
//!
//! ```toml
//! bind_addr = "0.0.0.0:40100"
//!
//! [tls]
//! ca_path = "/etc/gamebridge/ca.pem"
//! cert_path = "/etc/gamebridge/server.pem"
//! key_path = "/etc/gamebridge/server.key"
//!
//! [limits]
//! max_frame_bytes = 1048576
//!
//! [timeouts]
//! hello_ms = 3000
//!
//! [server]
//! capabilities = ["TELEMETRY_V1", "TIMESYNC_V1", "HELLO_ACK_V1", "ACTION_V1"]
//! ```

use crate::constants::{
    DEFAULT_ACTION_QUEUE_DEPTH, DEFAULT_ACTION_TTL_MS, DEFAULT_BRIDGE_BIND,
    DEFAULT_HELLO_TIMEOUT_MS, DEFAULT_SEND_ACTION_MS, DEFAULT_SEND_TELEMETRY_MS,
    DEFAULT_TRANSPORT_SEND_MS,
};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// TLS configuration. All three paths are required for the server binary;
/// they stay optional here so embedders can run plain TCP in tests.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// Path to the CA bundle client certificates are validated against
    pub ca_path: Option<PathBuf>,
    /// Path to the server certificate (PEM)
    pub cert_path: Option<PathBuf>,
    /// Path to the server private key (PEM)
    pub key_path: Option<PathBuf>,
    /// Server name for SNI (client-side)
    pub server_name: Option<String>,
}

impl TlsConfig {
    /// True when all certificate material paths are present.
    pub fn is_complete(&self) -> bool {
        self.ca_path.is_some() && self.cert_path.is_some() && self.key_path.is_some()
    }
}

/// Resource limits configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum frame size in bytes (default: 1 MiB)
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u32,
}

fn default_max_frame_bytes() -> u32 {
    1_048_576
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Timing budgets, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_hello_ms")]
    pub hello_ms: u64,
    #[serde(default = "default_send_telemetry_ms")]
    pub send_telemetry_ms: u64,
    #[serde(default = "default_send_action_ms")]
    pub send_action_ms: u64,
    #[serde(default = "default_transport_send_ms")]
    pub transport_send_ms: u64,
    #[serde(default = "default_action_ttl_ms")]
    pub action_default_ttl_ms: u64,
}

fn default_hello_ms() -> u64 {
    DEFAULT_HELLO_TIMEOUT_MS
}
fn default_send_telemetry_ms() -> u64 {
    DEFAULT_SEND_TELEMETRY_MS
}
fn default_send_action_ms() -> u64 {
    DEFAULT_SEND_ACTION_MS
}
fn default_transport_send_ms() -> u64 {
    DEFAULT_TRANSPORT_SEND_MS
}
fn default_action_ttl_ms() -> u64 {
    DEFAULT_ACTION_TTL_MS
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            hello_ms: default_hello_ms(),
            send_telemetry_ms: default_send_telemetry_ms(),
            send_action_ms: default_send_action_ms(),
            transport_send_ms: default_transport_send_ms(),
            action_default_ttl_ms: default_action_ttl_ms(),
        }
    }
}

/// Queue sizing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuesConfig {
    #[serde(default = "default_action_depth")]
    pub action_depth: usize,
}

fn default_action_depth() -> usize {
    DEFAULT_ACTION_QUEUE_DEPTH
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            action_depth: default_action_depth(),
        }
    }
}

/// Server-side protocol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Capability names the bridge advertises; intersected with each
    /// client's set during the handshake. Wire spellings (`TELEMETRY_V1`…).
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
}

fn default_capabilities() -> Vec<String> {
    vec![
        "TELEMETRY_V1".to_string(),
        "TIMESYNC_V1".to_string(),
        "HELLO_ACK_V1".to_string(),
        "ACTION_V1".to_string(),
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capabilities: default_capabilities(),
        }
    }
}

/// Top-level bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub queues: QueuesConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[allow(clippy::expect_used)]
fn default_bind_addr() -> SocketAddr {
    DEFAULT_BRIDGE_BIND
        .parse()
        .expect("default bind address is valid")
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            tls: TlsConfig::default(),
            limits: LimitsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            queues: QueuesConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load a configuration file (TOML).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&raw)
            .map_err(|e| BridgeError::Config(format!("cannot parse {}: {e}", path.display())))
    }
}
