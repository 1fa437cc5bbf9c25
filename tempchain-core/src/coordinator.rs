//! # Coordinator
//!
//! Owns the agent registry and the pending set of the round in flight. The
//! coordinator is driven by a single task: transport events come in through
//! [`Coordinator::handle_event`], operator commands through the `assign`,
//! `broadcast` and `pause_*` methods. Nothing here blocks or awaits, so the
//! state is only ever mutated from that one task.

use tracing::{debug, error, info, warn};

use crate::agent_registry::{AgentError, AgentHandle, AgentRegistry, AgentResult, ConnectionId};
use crate::pending_set::{PendingSet, Recorded};
use crate::protocol::{AgentMessage, CoordinatorMessage};
use crate::round::{AgentId, RoundId, RoundReport, RoundResult, RoundSpec};

/// What the transport reports about its connections.
#[derive(Debug)]
pub enum CoordinatorEvent {
    Connected {
        agent_id: AgentId,
        handle: AgentHandle,
    },
    Message {
        agent_id: AgentId,
        connection: ConnectionId,
        message: AgentMessage,
    },
    Disconnected {
        agent_id: AgentId,
        connection: ConnectionId,
    },
}

pub struct Coordinator {
    registry: AgentRegistry,
    pending: Option<PendingSet>,
    last_round: RoundId,
}

impl Coordinator {
    pub fn new(registry: AgentRegistry) -> Self {
        Self {
            registry,
            pending: None,
            last_round: 0,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn handle_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Connected { agent_id, handle } => {
                self.on_connect(&agent_id, handle);
            }
            CoordinatorEvent::Message {
                agent_id,
                connection,
                message,
            } => {
                if !self.registry.is_current(&agent_id, connection) {
                    warn!("Dropping frame from stale connection of agent {}", agent_id);
                    return;
                }
                match message {
                    AgentMessage::Results {
                        round,
                        completed_count,
                        elapsed_seconds,
                    } => {
                        self.on_result(
                            &agent_id,
                            round,
                            RoundResult {
                                completed_count,
                                elapsed_seconds,
                            },
                        );
                    }
                    AgentMessage::Err { round, message } => {
                        self.on_error(&agent_id, round, &message)
                    }
                }
            }
            CoordinatorEvent::Disconnected {
                agent_id,
                connection,
            } => {
                self.on_disconnect(&agent_id, connection);
            }
        }
    }

    /// Registers the connection. A replaced connection took its task with it,
    /// so an agent still pending over it is resolved with the implicit result.
    pub fn on_connect(&mut self, agent_id: &str, handle: AgentHandle) -> Recorded {
        info!("Client connected => {}", agent_id);
        if self.registry.register(agent_id, handle).is_none() {
            return Recorded::Ignored;
        }
        self.resolve_implicit(agent_id)
    }

    /// Assigns one spec per target and starts (or joins) the pending round.
    ///
    /// `on_complete` runs exactly once, when the last target has reported or
    /// disconnected; with no targets it runs before this returns.
    #[tracing::instrument(skip(self, assignments, on_complete), fields(targets = assignments.len()))]
    pub fn assign(
        &mut self,
        assignments: Vec<(AgentId, RoundSpec)>,
        on_complete: impl FnOnce(RoundReport) + Send + 'static,
    ) -> RoundId {
        self.last_round += 1;
        let round = self.last_round;
        let ids: Vec<AgentId> = assignments.iter().map(|(id, _)| id.clone()).collect();

        match self.pending.as_mut() {
            Some(pending) => {
                warn!(
                    "Round {} still has {} pending agents, merging round {}",
                    pending.round(),
                    pending.remaining(),
                    round
                );
                pending.extend(round, ids, Box::new(on_complete));
            }
            None => {
                let pending = PendingSet::new(round, ids, Box::new(on_complete));
                if !pending.is_complete() {
                    self.pending = Some(pending);
                }
            }
        }

        for (agent_id, spec) in assignments {
            let message = CoordinatorMessage::task(round, &spec);
            if let Err(e) = self.registry.send(&agent_id, message) {
                error!("Failed to assign round {} to {}: {}", round, agent_id, e);
                self.resolve_implicit(&agent_id);
            }
        }
        round
    }

    /// Assigns `spec` to every connected agent.
    pub fn broadcast(
        &mut self,
        spec: &RoundSpec,
        on_complete: impl FnOnce(RoundReport) + Send + 'static,
    ) -> RoundId {
        let assignments = self
            .registry
            .agent_ids()
            .into_iter()
            .map(|id| (id, spec.clone()))
            .collect();
        self.assign(assignments, on_complete)
    }

    pub fn on_result(&mut self, agent_id: &str, round: RoundId, result: RoundResult) -> Recorded {
        let recorded = match self.pending.as_mut() {
            Some(pending) => pending.record_result(agent_id, round, result),
            None => Recorded::Ignored,
        };
        if recorded == Recorded::Ignored {
            debug!("Ignoring result of {} for round {}", agent_id, round);
        } else {
            info!(
                "Address {}: {} transactions executed in {}s ({} tx/s)",
                agent_id,
                result.completed_count,
                result.elapsed_seconds,
                result.throughput()
            );
        }
        self.clear_if_complete(recorded);
        recorded
    }

    /// Diagnostics never resolve a pending agent.
    pub fn on_error(&mut self, agent_id: &str, round: Option<RoundId>, message: &str) {
        match round {
            Some(round) => error!("Error at {} (round {}): {}", agent_id, round, message),
            None => error!("Error at {}: {}", agent_id, message),
        }
    }

    pub fn on_disconnect(&mut self, agent_id: &str, connection: ConnectionId) -> Recorded {
        if !self.registry.unregister(agent_id, connection) {
            return Recorded::Ignored;
        }
        warn!("Client disconnected => {}", agent_id);
        self.resolve_implicit(agent_id)
    }

    fn resolve_implicit(&mut self, agent_id: &str) -> Recorded {
        let recorded = match self.pending.as_mut() {
            Some(pending) => pending.record_disconnect(agent_id),
            None => Recorded::Ignored,
        };
        self.clear_if_complete(recorded);
        recorded
    }

    fn clear_if_complete(&mut self, recorded: Recorded) {
        if recorded == Recorded::Completed {
            info!("All pending tasks completed");
            self.pending = None;
        }
    }

    pub fn list_agents(&self) -> Vec<AgentId> {
        self.registry.agent_ids()
    }

    /// Sends a sleep directive. The pending set is left untouched; the agent's
    /// disconnect resolves it.
    pub fn pause_one(&self, agent_id: &str, hours: f64) -> AgentResult<()> {
        info!("Pausing {} for {} hours", agent_id, hours);
        self.registry
            .send(agent_id, CoordinatorMessage::Sleep { hours })
    }

    pub fn pause_all(&self, hours: f64) -> Vec<AgentError> {
        info!("Pausing all agents for {} hours", hours);
        self.registry
            .broadcast(&CoordinatorMessage::Sleep { hours })
    }

    pub fn is_round_in_flight(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_pending(&self, agent_id: &str) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| pending.contains(agent_id))
    }
}
