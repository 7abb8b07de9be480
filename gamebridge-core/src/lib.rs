//! GameBridge core: the mutually-authenticated session engine
//!
//! Terminates client connections, runs the handshake, routes envelopes
//! between peers (latest-only telemetry, ordered actions), correlates
//! action request/ack/result triples, and enforces deadlines and the
//! emergency stop.

pub mod bridge;
mod channel;
mod correlator;
pub mod estop;
pub mod metrics;
mod router;
pub mod transport;

// Re-export specific items for convenience
pub use bridge::client::{BridgeClient, HelloReply};
pub use bridge::registry::SessionRegistry;
pub use bridge::server::BridgeServer;
pub use bridge::session::{SessionHandle, SessionState};
pub use metrics::{BridgeMetrics, MetricsSnapshot};
