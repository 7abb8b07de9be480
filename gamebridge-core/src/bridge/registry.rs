//! Session registry: an index, not an owner
//!
//! Sessions own their queues; the registry stores only the enqueue handles,
//! keyed by session id with a `(role, agent_id)` secondary index. A session
//! deregisters itself before dropping its queue, so routing failures show up
//! as an unroutable target rather than a hung send.

use crate::bridge::session::SessionHandle;
use dashmap::DashMap;
use gamebridge_protocol::Role;
use std::sync::Arc;
use uuid::Uuid;

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("agent '{agent_id}' with role {role} is already connected")]
    AgentAlreadyConnected { role: Role, agent_id: String },
}

/// Thread-safe index of Established sessions
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<Uuid, SessionHandle>>,
    agent_index: Arc<DashMap<(Role, String), Uuid>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session.
    /// Fails when the `(role, agent_id)` pair is already connected.
    pub fn add(&self, handle: SessionHandle) -> Result<(), RegistryError> {
        let key = (handle.role(), handle.agent_id().to_string());
        let session_id = handle.session_id();

        if let Some(existing) = self.agent_index.get(&key) {
            if *existing != session_id {
                return Err(RegistryError::AgentAlreadyConnected {
                    role: key.0,
                    agent_id: key.1,
                });
            }
        }

        self.agent_index.insert(key, session_id);
        self.sessions.insert(session_id, handle);
        Ok(())
    }

    /// Remove a session by id.
    pub fn remove(&self, session_id: &Uuid) -> Option<SessionHandle> {
        if let Some((_, handle)) = self.sessions.remove(session_id) {
            self.agent_index
                .remove(&(handle.role(), handle.agent_id().to_string()));
            Some(handle)
        } else {
            None
        }
    }

    /// Get a session by id. Handles are cheap clones of the enqueue side.
    pub fn get(&self, session_id: &Uuid) -> Option<SessionHandle> {
        self.sessions.get(session_id).map(|r| r.clone())
    }

    /// Find a session by role and agent id.
    pub fn find(&self, role: Role, agent_id: &str) -> Option<SessionHandle> {
        let id = self.agent_index.get(&(role, agent_id.to_string()))?;
        self.sessions.get(&id).map(|r| r.clone())
    }

    /// All orchestrator sessions (telemetry fan-out targets).
    pub fn orchestrators(&self) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .filter(|r| r.role() == Role::Orchestrator)
            .map(|r| r.clone())
            .collect()
    }

    /// The single game client, when exactly one is connected.
    pub fn unique_game_client(&self) -> Option<SessionHandle> {
        let mut found = None;
        for r in self.sessions.iter() {
            if r.role() == Role::GameClient {
                if found.is_some() {
                    return None;
                }
                found = Some(r.clone());
            }
        }
        found
    }

    /// Count active sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}
