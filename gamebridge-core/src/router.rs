//! Frame routing for Established sessions
//!
//! One router per session, owned by its inbound task. Classifies each
//! decoded item, enforces protocol version, sequence monotonicity, and role
//! discipline, then hands the payload to the right channel or to the
//! correlator. Errors are surfaced as error frames on the offending session;
//! only a version mismatch or a sequence rewind is fatal.

use crate::bridge::registry::SessionRegistry;
use crate::bridge::session::{EnqueueError, SessionHandle, SessionShared};
use crate::correlator::CorrelatorHandle;
use crate::metrics::BridgeMetrics;
use gamebridge_common::{mono_ms, wall_unix_ms};
use gamebridge_protocol::constants::PROTOCOL_VERSION;
use gamebridge_protocol::validation::{validate_envelope, ValidationLimits};
use gamebridge_protocol::{
    ActionAck, ActionRequest, ActionResult, Capability, Envelope, ErrorCode, ErrorFrame, Inbound,
    Payload, Role, TelemetryFrame, TimeSyncRequest, TimeSyncResponse,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the session loop should do after one routed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RouteOutcome {
    Continue,
    /// Fatal protocol error; the reply is already queued. Move to Closing.
    Fatal,
}

pub(crate) struct SessionRouter {
    shared: Arc<SessionShared>,
    /// Own session's enqueue side, for in-session replies
    handle: SessionHandle,
    registry: SessionRegistry,
    correlator: CorrelatorHandle,
    metrics: Arc<BridgeMetrics>,
    limits: ValidationLimits,
    last_state_version: Option<u64>,
}

impl SessionRouter {
    pub fn new(
        handle: SessionHandle,
        registry: SessionRegistry,
        correlator: CorrelatorHandle,
        metrics: Arc<BridgeMetrics>,
        limits: ValidationLimits,
    ) -> Self {
        Self {
            shared: handle.shared().clone(),
            handle,
            registry,
            correlator,
            metrics,
            limits,
            last_state_version: None,
        }
    }

    pub async fn route(&mut self, inbound: Inbound) -> RouteOutcome {
        match inbound {
            Inbound::Malformed { reason } => {
                BridgeMetrics::incr(&self.metrics.protocol_errors);
                debug!(
                    session_id = %self.shared.session_id,
                    reason = %reason,
                    "malformed frame"
                );
                self.reply(Payload::Error(ErrorFrame::new(ErrorCode::CodecError, reason)));
                RouteOutcome::Continue
            }
            Inbound::Unsupported { head, kind } => {
                if head.protocol_version != PROTOCOL_VERSION {
                    return self.version_mismatch(head.protocol_version);
                }
                self.shared.note_rx(head.seq);
                BridgeMetrics::incr(&self.metrics.protocol_errors);
                self.reply(Payload::Error(ErrorFrame::new(
                    ErrorCode::UnsupportedPayload,
                    format!("unsupported payload kind {kind:#04x}"),
                )));
                RouteOutcome::Continue
            }
            Inbound::Envelope(envelope) => self.route_envelope(envelope).await,
        }
    }

    async fn route_envelope(&mut self, envelope: Envelope) -> RouteOutcome {
        if envelope.head.protocol_version != PROTOCOL_VERSION {
            return self.version_mismatch(envelope.head.protocol_version);
        }

        let prev = self.shared.peer_seq_last.load(Ordering::Relaxed);
        if envelope.head.seq < prev {
            warn!(
                session_id = %self.shared.session_id,
                seq = envelope.head.seq,
                prev,
                "sequence rewind"
            );
            BridgeMetrics::incr(&self.metrics.protocol_errors);
            self.reply(Payload::Error(ErrorFrame::new(
                ErrorCode::CodecError,
                "sequence rewind",
            )));
            return RouteOutcome::Fatal;
        }
        self.shared.note_rx(envelope.head.seq);

        if let Err(e) = validate_envelope(&envelope, &self.limits) {
            BridgeMetrics::incr(&self.metrics.protocol_errors);
            self.reply(Payload::Error(ErrorFrame::new(
                ErrorCode::CodecError,
                e.to_string(),
            )));
            return RouteOutcome::Continue;
        }

        match envelope.payload {
            Payload::Telemetry(frame) => self.on_telemetry(*frame),
            Payload::ActionRequest(request) => self.on_action_request(*request).await,
            Payload::ActionAck(ack) => self.on_action_ack(ack).await,
            Payload::ActionResult(result) => self.on_action_result(result).await,
            Payload::TimeSyncRequest(request) => self.on_timesync(request),
            Payload::Error(frame) => self.on_error(frame).await,
            Payload::Hello(_) | Payload::HelloAck(_) => {
                BridgeMetrics::incr(&self.metrics.protocol_errors);
                self.reply(Payload::Error(ErrorFrame::new(
                    ErrorCode::UnexpectedPayload,
                    "handshake already complete",
                )));
                RouteOutcome::Continue
            }
            Payload::TimeSyncResponse(_) => {
                BridgeMetrics::incr(&self.metrics.protocol_errors);
                self.reply(Payload::Error(ErrorFrame::new(
                    ErrorCode::UnexpectedPayload,
                    "unsolicited timesync response",
                )));
                RouteOutcome::Continue
            }
        }
    }

    fn on_telemetry(&mut self, frame: TelemetryFrame) -> RouteOutcome {
        if self.shared.role != Role::GameClient {
            return self.role_violation("telemetry from a non-game-client session");
        }
        if !self.shared.capabilities.contains(&Capability::TelemetryV1) {
            BridgeMetrics::incr(&self.metrics.protocol_errors);
            self.reply(Payload::Error(ErrorFrame::new(
                ErrorCode::UnexpectedPayload,
                "TELEMETRY_V1 not negotiated",
            )));
            return RouteOutcome::Continue;
        }

        // state_version strictly increases per session; stale samples are
        // dropped rather than severing an otherwise healthy feed.
        if self
            .last_state_version
            .is_some_and(|last| frame.state_version <= last)
        {
            BridgeMetrics::incr(&self.metrics.telemetry_stale);
            debug!(
                session_id = %self.shared.session_id,
                state_version = frame.state_version,
                "stale telemetry dropped"
            );
            return RouteOutcome::Continue;
        }
        self.last_state_version = Some(frame.state_version);

        let payload = Payload::Telemetry(Box::new(frame));
        for orchestrator in self.registry.orchestrators() {
            if !orchestrator
                .capabilities()
                .contains(&Capability::TelemetryV1)
            {
                continue;
            }
            let displaced = orchestrator.push_telemetry(payload.clone());
            BridgeMetrics::incr(&self.metrics.telemetry_relayed);
            if displaced {
                BridgeMetrics::incr(&self.metrics.telemetry_dropped);
            }
        }
        RouteOutcome::Continue
    }

    async fn on_action_request(&mut self, request: ActionRequest) -> RouteOutcome {
        if self.shared.role != Role::Orchestrator {
            return self.role_violation("action request from a non-orchestrator session");
        }
        if !self.shared.capabilities.contains(&Capability::ActionV1) {
            BridgeMetrics::incr(&self.metrics.protocol_errors);
            self.reply(Payload::Error(
                ErrorFrame::new(ErrorCode::UnexpectedPayload, "ACTION_V1 not negotiated")
                    .with_request_id(request.request_id),
            ));
            return RouteOutcome::Continue;
        }
        self.correlator
            .relay(self.shared.session_id, request)
            .await;
        RouteOutcome::Continue
    }

    async fn on_action_ack(&mut self, ack: ActionAck) -> RouteOutcome {
        if self.shared.role != Role::GameClient {
            return self.role_violation("action ack from a non-game-client session");
        }
        self.correlator
            .ack_observed(self.shared.session_id, ack)
            .await;
        RouteOutcome::Continue
    }

    async fn on_action_result(&mut self, result: ActionResult) -> RouteOutcome {
        if self.shared.role != Role::GameClient {
            return self.role_violation("action result from a non-game-client session");
        }
        self.correlator
            .result_observed(self.shared.session_id, result)
            .await;
        RouteOutcome::Continue
    }

    fn on_timesync(&mut self, request: TimeSyncRequest) -> RouteOutcome {
        let response = TimeSyncResponse {
            t_server_mono_ms: mono_ms(),
            t_server_wall_unix_ms: wall_unix_ms(),
            echo: request,
        };
        self.reply(Payload::TimeSyncResponse(Box::new(response)));
        RouteOutcome::Continue
    }

    async fn on_error(&mut self, frame: ErrorFrame) -> RouteOutcome {
        warn!(
            session_id = %self.shared.session_id,
            code = ?frame.code,
            message = %frame.message,
            "peer reported error"
        );
        if frame.request_id.is_some() {
            self.correlator.error_observed(frame).await;
        }
        RouteOutcome::Continue
    }

    fn version_mismatch(&self, version: u32) -> RouteOutcome {
        warn!(
            session_id = %self.shared.session_id,
            version,
            "protocol version mismatch"
        );
        BridgeMetrics::incr(&self.metrics.protocol_errors);
        self.reply(Payload::Error(ErrorFrame::new(
            ErrorCode::VersionMismatch,
            format!("protocol version {version} not supported"),
        )));
        RouteOutcome::Fatal
    }

    fn role_violation(&self, message: &str) -> RouteOutcome {
        BridgeMetrics::incr(&self.metrics.protocol_errors);
        self.reply(Payload::Error(ErrorFrame::new(
            ErrorCode::RoleViolation,
            message,
        )));
        RouteOutcome::Continue
    }

    /// In-session reply through the ordered queue. Dropped on congestion;
    /// errors never block the read loop.
    fn reply(&self, payload: Payload) {
        match self.handle.try_send_ordered(payload) {
            Ok(()) => {}
            Err(EnqueueError::Congested) => debug!(
                session_id = %self.shared.session_id,
                "reply dropped, queue congested"
            ),
            Err(EnqueueError::Closed) => {}
        }
    }
}
