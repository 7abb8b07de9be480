//! Default addresses and timing budgets for the bridge.
//!
//! Use these constants instead of magic numbers so defaults stay consistent
//! across the library, the server binary, and the tests.

/// Default port for the bridge session endpoint.
pub const DEFAULT_BRIDGE_PORT: u16 = 40100;

/// Default bind address for the bridge as a string (`0.0.0.0:40100`).
pub const DEFAULT_BRIDGE_BIND: &str = "0.0.0.0:40100";

/// Handshake must complete within this budget.
pub const DEFAULT_HELLO_TIMEOUT_MS: u64 = 3000;

/// Enqueue budget for a telemetry sample toward a destination session.
pub const DEFAULT_SEND_TELEMETRY_MS: u64 = 200;

/// Enqueue budget for an action envelope toward a destination session.
pub const DEFAULT_SEND_ACTION_MS: u64 = 500;

/// A single transport write stalling longer than this closes the session.
pub const DEFAULT_TRANSPORT_SEND_MS: u64 = 2000;

/// TTL applied to actions that carry no expiry of their own.
pub const DEFAULT_ACTION_TTL_MS: u64 = 10_000;

/// Depth of the per-session ordered action queue.
pub const DEFAULT_ACTION_QUEUE_DEPTH: usize = 64;
