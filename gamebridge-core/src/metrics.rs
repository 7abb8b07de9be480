//! Process-local operational counters
//!
//! Telemetry drop counts and action outcomes are exposed here rather than on
//! the wire. The server binary logs a snapshot periodically; embedders can
//! poll [`BridgeMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BridgeMetrics {
    pub sessions_opened: AtomicU64,
    pub sessions_closed: AtomicU64,
    pub telemetry_relayed: AtomicU64,
    pub telemetry_dropped: AtomicU64,
    pub telemetry_stale: AtomicU64,
    pub actions_relayed: AtomicU64,
    pub actions_rejected: AtomicU64,
    pub actions_completed: AtomicU64,
    pub actions_timed_out: AtomicU64,
    pub emergency_stops: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub transport_stalls: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub telemetry_relayed: u64,
    pub telemetry_dropped: u64,
    pub telemetry_stale: u64,
    pub actions_relayed: u64,
    pub actions_rejected: u64,
    pub actions_completed: u64,
    pub actions_timed_out: u64,
    pub emergency_stops: u64,
    pub protocol_errors: u64,
    pub transport_stalls: u64,
}

impl BridgeMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            telemetry_relayed: self.telemetry_relayed.load(Ordering::Relaxed),
            telemetry_dropped: self.telemetry_dropped.load(Ordering::Relaxed),
            telemetry_stale: self.telemetry_stale.load(Ordering::Relaxed),
            actions_relayed: self.actions_relayed.load(Ordering::Relaxed),
            actions_rejected: self.actions_rejected.load(Ordering::Relaxed),
            actions_completed: self.actions_completed.load(Ordering::Relaxed),
            actions_timed_out: self.actions_timed_out.load(Ordering::Relaxed),
            emergency_stops: self.emergency_stops.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            transport_stalls: self.transport_stalls.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
