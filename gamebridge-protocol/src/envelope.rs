//! Protocol envelope and payload definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Envelope header shared by every payload variant.
///
/// `seq` is monotonic per sender; `ack` echoes the last `seq` observed from
/// the peer. `mono_ms` is the sender's monotonic clock, `wall_unix_ms` its
/// wall clock, both in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeHead {
    pub protocol_version: u32,
    pub session_id: String,
    pub seq: u64,
    pub ack: u64,
    pub mono_ms: u64,
    pub wall_unix_ms: u64,
}

/// Wire envelope: a header plus exactly one payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub head: EnvelopeHead,
    pub payload: Payload,
}

/// Envelope payload.
///
/// Large variants are boxed to keep the enum small for control payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Payload {
    /// Handshake opener from a connecting peer
    Hello(Box<Hello>),

    /// Handshake acknowledgement from the bridge
    HelloAck(Box<HelloAck>),

    /// High-frequency state sample from a game client
    Telemetry(Box<TelemetryFrame>),

    /// Control action issued by an orchestrator
    ActionRequest(Box<ActionRequest>),

    /// Executor's accept/reject decision for an action
    ActionAck(ActionAck),

    /// Terminal outcome of an action
    ActionResult(ActionResult),

    /// Clock probe
    TimeSyncRequest(TimeSyncRequest),

    /// Clock probe reply, echoing the request
    TimeSyncResponse(Box<TimeSyncResponse>),

    /// Error surfaced to the peer
    Error(ErrorFrame),
}

impl Payload {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Payload::Hello(_) => "hello",
            Payload::HelloAck(_) => "hello_ack",
            Payload::Telemetry(_) => "telemetry",
            Payload::ActionRequest(_) => "action_request",
            Payload::ActionAck(_) => "action_ack",
            Payload::ActionResult(_) => "action_result",
            Payload::TimeSyncRequest(_) => "timesync_request",
            Payload::TimeSyncResponse(_) => "timesync_response",
            Payload::Error(_) => "error",
        }
    }
}

/// Peer role declared in `Hello`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    GameClient,
    Orchestrator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::GameClient => write!(f, "GAME_CLIENT"),
            Role::Orchestrator => write!(f, "ORCHESTRATOR"),
        }
    }
}

/// A named protocol feature advertised in `Hello` and confirmed as the
/// intersection in `HelloAck`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    TelemetryV1,
    TimesyncV1,
    HelloAckV1,
    ActionV1,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::TelemetryV1,
        Capability::TimesyncV1,
        Capability::HelloAckV1,
        Capability::ActionV1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::TelemetryV1 => "TELEMETRY_V1",
            Capability::TimesyncV1 => "TIMESYNC_V1",
            Capability::HelloAckV1 => "HELLO_ACK_V1",
            Capability::ActionV1 => "ACTION_V1",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unknown capability spellings.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown capability '{0}'")]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TELEMETRY_V1" => Ok(Capability::TelemetryV1),
            "TIMESYNC_V1" => Ok(Capability::TimesyncV1),
            "HELLO_ACK_V1" => Ok(Capability::HelloAckV1),
            "ACTION_V1" => Ok(Capability::ActionV1),
            other => Err(UnknownCapability(other.to_string())),
        }
    }
}

/// Handshake payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    pub agent_id: String,
    pub role: Role,
    pub capabilities: BTreeSet<Capability>,
    pub client_version: String,
    /// Client-proposed nonce. Recorded for diagnostics; the bridge always
    /// assigns its own handshake id.
    pub handshake_id: Option<String>,
}

/// Handshake acknowledgement. `handshake_id` is server-assigned;
/// `capabilities` is the intersection of both sides' sets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloAck {
    pub accepted: bool,
    pub reason: String,
    pub handshake_id: String,
    pub capabilities: BTreeSet<Capability>,
}

/// Player position and view angles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

/// Player vitals. `hp` and `hunger` range over [0, 20], `air` over [0, 300].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Vitals {
    pub hp: f32,
    pub hunger: f32,
    pub air: f32,
}

/// Movement state flags.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MovementFlags {
    pub sprinting: bool,
    pub sneaking: bool,
    pub on_ground: bool,
}

/// World dimension the sample was taken in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Dimension {
    #[default]
    Unspecified,
    Overworld,
    Nether,
    End,
    Other,
}

/// One state sample. `state_version` strictly increases per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryFrame {
    pub state_version: u64,
    pub pose: Pose,
    pub vitals: Vitals,
    pub flags: MovementFlags,
    pub dimension: Dimension,
    pub world_tick: u64,
}

/// Typed action body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ActionBody {
    /// Release all actuators. Always allowlisted and idempotent at the
    /// executor.
    StopAll,

    /// Path to a target position via the client's navigator.
    BaritoneGoto(BaritoneGoto),
}

impl ActionBody {
    pub fn name(&self) -> &'static str {
        match self {
            ActionBody::StopAll => "STOP_ALL",
            ActionBody::BaritoneGoto(_) => "BARITONE_GOTO",
        }
    }

    pub fn is_stop_all(&self) -> bool {
        matches!(self, ActionBody::StopAll)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaritoneGoto {
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub max_distance: u32,
    pub timeout_ms: u64,
    pub stuck_timeout_ms: u64,
}

/// Control action addressed to a game client.
///
/// An empty `target_agent_id` targets the unique game client.
/// `expires_at_unix_ms == 0` means no caller-supplied TTL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRequest {
    pub request_id: String,
    pub target_agent_id: String,
    pub expires_at_unix_ms: u64,
    pub body: ActionBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionAck {
    pub request_id: String,
    pub accepted: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActionStatus {
    Ok,
    Rejected,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionResult {
    pub request_id: String,
    pub status: ActionStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSyncRequest {
    pub t_client_mono_ms: u64,
    pub t_client_wall_unix_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSyncResponse {
    pub t_server_mono_ms: u64,
    pub t_server_wall_unix_ms: u64,
    pub echo: TimeSyncRequest,
}

/// Error codes surfaced in [`ErrorFrame`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    CodecError = 1,
    VersionMismatch = 2,
    HandshakeRequired = 3,
    HelloTimeout = 4,
    RoleViolation = 5,
    UnexpectedPayload = 6,
    UnsupportedPayload = 7,
    DuplicateRequest = 8,
    TargetUnroutable = 9,
    RelayCongested = 10,
    ActionTtlExpired = 11,
    TransportStalled = 12,
}

/// Error surfaced to a peer. `request_id` correlates action-lifecycle errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorFrame {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
}

impl ErrorFrame {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}
