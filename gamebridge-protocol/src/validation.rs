//! Envelope validation for security hardening

use crate::envelope::{Envelope, Payload};
use uuid::Uuid;

/// Validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Agent id too long: {len} bytes exceeds limit of {limit} bytes")]
    AgentIdTooLong { len: usize, limit: usize },

    #[error("Agent id is empty")]
    AgentIdEmpty,

    #[error("Session id too long: {len} bytes exceeds limit of {limit} bytes")]
    SessionIdTooLong { len: usize, limit: usize },

    #[error("Too many capabilities: {count} exceeds limit of {limit}")]
    TooManyCapabilities { count: usize, limit: usize },

    #[error("String field too long: {len} bytes exceeds limit of {limit} bytes")]
    StringTooLong { len: usize, limit: usize },

    #[error("Request id is empty")]
    RequestIdEmpty,

    #[error("Request id is not a UUID: '{0}'")]
    RequestIdNotUuid(String),
}

/// Validation limits
#[derive(Debug, Clone)]
pub struct ValidationLimits {
    pub max_agent_id_len: usize,
    pub max_session_id_len: usize,
    pub max_capabilities: usize,
    pub max_string_len: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_agent_id_len: 128,
            max_session_id_len: 64,
            max_capabilities: 16,
            max_string_len: 4096,
        }
    }
}

fn check_string(s: &str, limit: usize) -> Result<(), ValidationError> {
    if s.len() > limit {
        return Err(ValidationError::StringTooLong {
            len: s.len(),
            limit,
        });
    }
    Ok(())
}

/// Validate that a request id is non-empty and UUID-shaped.
pub fn validate_request_id(request_id: &str) -> Result<(), ValidationError> {
    if request_id.is_empty() {
        return Err(ValidationError::RequestIdEmpty);
    }
    Uuid::parse_str(request_id)
        .map(|_| ())
        .map_err(|_| ValidationError::RequestIdNotUuid(request_id.to_string()))
}

/// Validate a decoded envelope against limits.
///
/// Protocol-version and sequence checks stay with the session layer; this is
/// purely structural hardening applied before routing.
pub fn validate_envelope(
    envelope: &Envelope,
    limits: &ValidationLimits,
) -> Result<(), ValidationError> {
    if envelope.head.session_id.len() > limits.max_session_id_len {
        return Err(ValidationError::SessionIdTooLong {
            len: envelope.head.session_id.len(),
            limit: limits.max_session_id_len,
        });
    }

    match &envelope.payload {
        Payload::Hello(hello) => {
            if hello.agent_id.is_empty() {
                return Err(ValidationError::AgentIdEmpty);
            }
            if hello.agent_id.len() > limits.max_agent_id_len {
                return Err(ValidationError::AgentIdTooLong {
                    len: hello.agent_id.len(),
                    limit: limits.max_agent_id_len,
                });
            }
            if hello.capabilities.len() > limits.max_capabilities {
                return Err(ValidationError::TooManyCapabilities {
                    count: hello.capabilities.len(),
                    limit: limits.max_capabilities,
                });
            }
            check_string(&hello.client_version, limits.max_string_len)?;
            if let Some(id) = &hello.handshake_id {
                check_string(id, limits.max_string_len)?;
            }
        }
        Payload::ActionRequest(req) => {
            validate_request_id(&req.request_id)?;
            if req.target_agent_id.len() > limits.max_agent_id_len {
                return Err(ValidationError::AgentIdTooLong {
                    len: req.target_agent_id.len(),
                    limit: limits.max_agent_id_len,
                });
            }
        }
        Payload::ActionAck(ack) => {
            check_string(&ack.request_id, limits.max_string_len)?;
            check_string(&ack.reason, limits.max_string_len)?;
        }
        Payload::ActionResult(result) => {
            check_string(&result.request_id, limits.max_string_len)?;
            check_string(&result.detail, limits.max_string_len)?;
        }
        Payload::Error(err) => {
            check_string(&err.message, limits.max_string_len)?;
        }
        _ => {}
    }
    Ok(())
}
