//! GameBridge wire protocol
//!
//! This crate defines the versioned binary envelope exchanged between the
//! bridge, game clients, and orchestrators.

pub mod codec;
pub mod constants;
pub mod envelope;
pub mod validation;

pub use codec::{EnvelopeCodec, Inbound};
pub use envelope::{
    ActionAck, ActionBody, ActionRequest, ActionResult, ActionStatus, BaritoneGoto, Capability,
    Dimension, Envelope, EnvelopeHead, ErrorCode, ErrorFrame, Hello, HelloAck, MovementFlags,
    Payload, Pose, Role, TelemetryFrame, TimeSyncRequest, TimeSyncResponse, Vitals,
};
