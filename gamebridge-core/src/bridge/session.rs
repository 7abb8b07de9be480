//! Per-session state and the outbound writer task
//!
//! A session owns its transport exclusively: one task decodes inbound
//! envelopes, one task drains the outbound queues and writes. Everything
//! other tasks may touch lives behind [`SessionHandle`], which carries only
//! enqueue ends and shared atomics.

use crate::channel::{SlotReceiver, SlotSender};
use crate::metrics::BridgeMetrics;
use crate::transport::BoxedStream;
use futures::SinkExt;
use gamebridge_common::{mono_ms, wall_unix_ms};
use gamebridge_protocol::constants::PROTOCOL_VERSION;
use gamebridge_protocol::{Capability, Envelope, EnvelopeCodec, EnvelopeHead, Payload, Role};
use kanal::{AsyncReceiver, AsyncSender};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::WriteHalf;
use tokio::time::timeout;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};
use uuid::Uuid;

/// Session lifecycle. `AwaitingHello` sessions are not yet registered;
/// `Closing` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHello,
    Established,
    Closing,
}

/// Identity and counters shared between a session's tasks and its handle.
#[derive(Debug)]
pub struct SessionShared {
    pub session_id: Uuid,
    pub role: Role,
    pub agent_id: String,
    pub capabilities: BTreeSet<Capability>,
    pub handshake_id: String,
    pub client_version: String,
    pub peer_addr: SocketAddr,
    /// Highest `seq` observed from the peer
    pub peer_seq_last: AtomicU64,
    /// Monotonic ms of the last inbound envelope
    pub last_rx_mono_ms: AtomicU64,
}

impl SessionShared {
    pub fn note_rx(&self, seq: u64) {
        self.peer_seq_last.fetch_max(seq, Ordering::Relaxed);
        self.last_rx_mono_ms.store(mono_ms(), Ordering::Relaxed);
    }
}

/// Why an enqueue toward a session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnqueueError {
    /// Queue stayed full for the whole budget
    Congested,
    /// Session is gone; its queue is disconnected
    Closed,
}

/// Cloneable enqueue side of a session, stored in the registry.
///
/// Ordered payloads go through the bounded action queue; telemetry goes
/// through the latest-only slot. Neither path touches the owning session's
/// state directly.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
    actions: AsyncSender<Payload>,
    telemetry: SlotSender<Payload>,
}

impl SessionHandle {
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        actions: AsyncSender<Payload>,
        telemetry: SlotSender<Payload>,
    ) -> Self {
        Self {
            shared,
            actions,
            telemetry,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.shared.session_id
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn agent_id(&self) -> &str {
        &self.shared.agent_id
    }

    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.shared.capabilities
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    /// Enqueue an ordered payload, waiting up to `budget` for queue space.
    pub(crate) async fn send_ordered(
        &self,
        payload: Payload,
        budget: Duration,
    ) -> Result<(), EnqueueError> {
        match timeout(budget, self.actions.send(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(EnqueueError::Closed),
            Err(_) => Err(EnqueueError::Congested),
        }
    }

    /// Enqueue an ordered payload without waiting. The payload is dropped
    /// on congestion.
    pub(crate) fn try_send_ordered(&self, payload: Payload) -> Result<(), EnqueueError> {
        match self.actions.try_send(payload) {
            Ok(true) => Ok(()),
            Ok(false) => Err(EnqueueError::Congested),
            Err(_) => Err(EnqueueError::Closed),
        }
    }

    /// Put a telemetry payload into the latest-only slot.
    /// Returns true when an undelivered sample was displaced.
    pub(crate) fn push_telemetry(&self, payload: Payload) -> bool {
        self.telemetry.put(payload)
    }
}

/// Builds outbound envelopes with strictly increasing `seq`.
pub(crate) struct Stamper {
    session_id: String,
    next_seq: u64,
}

impl Stamper {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            next_seq: 1,
        }
    }

    pub fn stamp(&mut self, ack: u64, payload: Payload) -> Envelope {
        let seq = self.next_seq;
        self.next_seq += 1;
        Envelope {
            head: EnvelopeHead {
                protocol_version: PROTOCOL_VERSION,
                session_id: self.session_id.clone(),
                seq,
                ack,
                mono_ms: mono_ms(),
                wall_unix_ms: wall_unix_ms(),
            },
            payload,
        }
    }
}

/// State owned by the outbound writer task.
pub(crate) struct Outbound {
    pub shared: Arc<SessionShared>,
    pub stamper: Stamper,
    pub sink: FramedWrite<WriteHalf<BoxedStream>, EnvelopeCodec>,
    pub actions_rx: AsyncReceiver<Payload>,
    pub telemetry_rx: SlotReceiver<Payload>,
    /// Accept budget for one telemetry frame; missing it counts a drop,
    /// not a close
    pub telemetry_send: Duration,
    /// Stall budget for the transport itself; missing it closes the session
    pub transport_send: Duration,
    pub metrics: Arc<BridgeMetrics>,
}

/// Drain the session's outbound channels onto the wire.
///
/// Ends when every enqueue handle is gone (queue disconnect) or when a
/// write exceeds the transport stall budget; the session loop treats either
/// as the Closing transition.
pub(crate) async fn run_outbound(mut out: Outbound) {
    loop {
        let payload = tokio::select! {
            // Actions and control frames first; telemetry is latest-only
            // and tolerates waiting.
            biased;
            ordered = out.actions_rx.recv() => match ordered {
                Ok(payload) => payload,
                Err(_) => break,
            },
            sample = out.telemetry_rx.recv() => sample,
        };

        let is_telemetry = matches!(payload, Payload::Telemetry(_));
        let ack = out.shared.peer_seq_last.load(Ordering::Relaxed);
        let envelope = out.stamper.stamp(ack, payload);

        let budget = if is_telemetry {
            out.telemetry_send
        } else {
            out.transport_send
        };
        match timeout(budget, out.sink.send(envelope)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(
                    session_id = %out.shared.session_id,
                    error = %e,
                    "outbound write failed"
                );
                break;
            }
            Err(_) if is_telemetry => {
                // The wire did not accept the sample in time. The frame is
                // already buffered in the sink, so the slot keeps absorbing
                // newer samples while the transport gets the stall budget to
                // drain.
                BridgeMetrics::incr(&out.metrics.telemetry_dropped);
                match timeout(out.transport_send, out.sink.flush()).await {
                    Ok(Ok(())) => continue,
                    _ => {
                        warn!(
                            session_id = %out.shared.session_id,
                            budget_ms = out.transport_send.as_millis() as u64,
                            "transport stalled, closing session"
                        );
                        BridgeMetrics::incr(&out.metrics.transport_stalls);
                        break;
                    }
                }
            }
            Err(_) => {
                warn!(
                    session_id = %out.shared.session_id,
                    budget_ms = out.transport_send.as_millis() as u64,
                    "transport stalled, closing session"
                );
                BridgeMetrics::incr(&out.metrics.transport_stalls);
                break;
            }
        }
    }
}
