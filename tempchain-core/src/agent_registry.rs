use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::CoordinatorMessage;
use crate::round::AgentId;

/// Identifies one live transport connection. An agent that reconnects gets a
/// new one, which lets the registry tell a stale disconnect from a current one.
pub type ConnectionId = Uuid;

/// Outbound side of one agent connection.
///
/// The transport task owns the receiving half and the socket itself; dropping
/// the receiver makes every later send fail with [`AgentError::SendFailed`].
#[derive(Debug, Clone)]
pub struct AgentHandle {
    connection: ConnectionId,
    sender: mpsc::UnboundedSender<CoordinatorMessage>,
}

impl AgentHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CoordinatorMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                connection: Uuid::new_v4(),
                sender,
            },
            receiver,
        )
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    fn send(&self, agent_id: &str, message: CoordinatorMessage) -> AgentResult<()> {
        self.sender
            .send(message)
            .map_err(|e| AgentError::SendFailed {
                agent_id: agent_id.to_string(),
                message: e.to_string(),
            })
    }
}

/// Lookup from agent identifier to its live connection.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Arc<DashMap<AgentId, AgentHandle>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection, replacing (and returning) any previous one
    /// under the same identifier.
    #[tracing::instrument(skip(self, handle), level = "debug")]
    pub fn register(&self, id: &str, handle: AgentHandle) -> Option<AgentHandle> {
        let previous = self.agents.insert(id.to_string(), handle);
        if previous.is_some() {
            warn!("Agent {} reconnected, replacing previous connection", id);
        } else {
            info!("Agent {} registered", id);
        }
        previous
    }

    /// Removes the agent only if `connection` is still its current one.
    /// Returns whether an entry was removed.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn unregister(&self, id: &str, connection: ConnectionId) -> bool {
        let removed = self
            .agents
            .remove_if(id, |_, handle| handle.connection == connection)
            .is_some();
        if removed {
            info!("Agent {} unregistered", id);
        } else {
            debug!("Ignoring stale disconnect of agent {}", id);
        }
        removed
    }

    pub fn is_current(&self, id: &str, connection: ConnectionId) -> bool {
        self.agents
            .get(id)
            .is_some_and(|handle| handle.connection == connection)
    }

    pub fn send(&self, id: &str, message: CoordinatorMessage) -> AgentResult<()> {
        let handle = self
            .agents
            .get(id)
            .ok_or_else(|| AgentError::AgentNotFound {
                agent_id: id.to_string(),
            })?;
        handle.send(id, message)
    }

    /// Sends `message` to every registered agent and returns the failures.
    pub fn broadcast(&self, message: &CoordinatorMessage) -> Vec<AgentError> {
        self.agents
            .iter()
            .filter_map(|entry| entry.value().send(entry.key(), message.clone()).err())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// Registered identifiers in a stable (sorted) order.
    pub fn agent_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self
            .agents
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },
    #[error("Failed to send message to agent {agent_id}: {message}")]
    SendFailed { agent_id: String, message: String },
}

pub type AgentResult<T> = Result<T, AgentError>;
