//! Emergency-stop synthesis
//!
//! When an action's deadline expires without a terminal result, the
//! correlator hands the target over to this module: a `STOP_ALL` is
//! enqueued at the game client to release every actuator. `STOP_ALL` is
//! idempotent at the executor and always allowlisted.

use gamebridge_common::wall_unix_ms;
use gamebridge_protocol::{ActionBody, ActionRequest};
use uuid::Uuid;

/// TTL on the synthesized stop itself. Kept short: if the client cannot
/// even ack a stop within a second, the operator needs the timeout signal,
/// not another retry.
pub const STOP_ALL_TTL_MS: u64 = 1000;

/// Build a `STOP_ALL` request addressed at one game client.
pub fn stop_all_request(target_agent_id: &str) -> ActionRequest {
    ActionRequest {
        request_id: Uuid::new_v4().to_string(),
        target_agent_id: target_agent_id.to_string(),
        expires_at_unix_ms: wall_unix_ms() + STOP_ALL_TTL_MS,
        body: ActionBody::StopAll,
    }
}
