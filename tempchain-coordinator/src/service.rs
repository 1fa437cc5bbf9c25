//! # Coordinator service
//!
//! Runs the [`Coordinator`] on one task. Transport events and operator
//! commands arrive on separate channels and are applied one at a time;
//! completed rounds are published on the report channel.

use tempchain_core::agent_registry::{AgentError, AgentRegistry, AgentResult};
use tempchain_core::coordinator::{Coordinator, CoordinatorEvent};
use tempchain_core::pending_set::RoundCompleteCallback;
use tempchain_core::round::{AgentId, RoundId, RoundReport, RoundSpec};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};

#[derive(Debug)]
pub enum Command {
    Broadcast {
        spec: RoundSpec,
        reply: oneshot::Sender<RoundId>,
    },
    Assign {
        assignments: Vec<(AgentId, RoundSpec)>,
        reply: oneshot::Sender<RoundId>,
    },
    ListAgents {
        reply: oneshot::Sender<Vec<AgentId>>,
    },
    Pause {
        agent_id: AgentId,
        hours: f64,
        reply: oneshot::Sender<AgentResult<()>>,
    },
    PauseAll {
        hours: f64,
        reply: oneshot::Sender<Vec<AgentError>>,
    },
}

/// Cloneable front door to a running [`CoordinatorService`].
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl CoordinatorHandle {
    pub async fn broadcast(&self, spec: RoundSpec) -> AppResult<RoundId> {
        self.request(|reply| Command::Broadcast { spec, reply }).await
    }

    pub async fn assign(&self, assignments: Vec<(AgentId, RoundSpec)>) -> AppResult<RoundId> {
        self.request(|reply| Command::Assign { assignments, reply })
            .await
    }

    pub async fn list_agents(&self) -> AppResult<Vec<AgentId>> {
        self.request(|reply| Command::ListAgents { reply }).await
    }

    pub async fn pause(&self, agent_id: &str, hours: f64) -> AppResult<()> {
        let agent_id = agent_id.to_string();
        self.request(|reply| Command::Pause {
            agent_id,
            hours,
            reply,
        })
        .await?
        .map_err(AppError::from)
    }

    /// Returns the agents the directive could not reach.
    pub async fn pause_all(&self, hours: f64) -> AppResult<Vec<AgentError>> {
        self.request(|reply| Command::PauseAll { hours, reply })
            .await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> AppResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| AppError::Stopped)?;
        response.await.map_err(|_| AppError::Stopped)
    }
}

/// Channel ends handed to the transport and the console.
pub struct ServiceChannels {
    pub events: mpsc::UnboundedSender<CoordinatorEvent>,
    pub handle: CoordinatorHandle,
    pub reports: mpsc::UnboundedReceiver<RoundReport>,
}

pub struct CoordinatorService {
    coordinator: Coordinator,
    events: mpsc::UnboundedReceiver<CoordinatorEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    reports: mpsc::UnboundedSender<RoundReport>,
}

impl CoordinatorService {
    pub fn new() -> (Self, ServiceChannels) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (reports, reports_rx) = mpsc::unbounded_channel();
        let service = Self {
            coordinator: Coordinator::new(AgentRegistry::new()),
            events,
            commands,
            reports,
        };
        let channels = ServiceChannels {
            events: events_tx,
            handle: CoordinatorHandle {
                commands: commands_tx,
            },
            reports: reports_rx,
        };
        (service, channels)
    }

    /// Runs until both the transport and every handle are gone.
    pub async fn run(mut self) {
        info!("Coordinator started");
        loop {
            // queued transport events drain before commands
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => self.coordinator.handle_event(event),
                Some(command) = self.commands.recv() => self.execute(command),
                else => break,
            }
        }
        info!("Coordinator stopped");
    }

    fn execute(&mut self, command: Command) {
        debug!("Executing {:?}", command);
        match command {
            Command::Broadcast { spec, reply } => {
                let round = self.coordinator.broadcast(&spec, self.publisher());
                let _ = reply.send(round);
            }
            Command::Assign { assignments, reply } => {
                let round = self.coordinator.assign(assignments, self.publisher());
                let _ = reply.send(round);
            }
            Command::ListAgents { reply } => {
                let _ = reply.send(self.coordinator.list_agents());
            }
            Command::Pause {
                agent_id,
                hours,
                reply,
            } => {
                let _ = reply.send(self.coordinator.pause_one(&agent_id, hours));
            }
            Command::PauseAll { hours, reply } => {
                let _ = reply.send(self.coordinator.pause_all(hours));
            }
        }
    }

    /// Only the assignment that opens a pending set publishes; merged
    /// assignments complete with it and share its single report.
    fn publisher(&self) -> RoundCompleteCallback {
        if self.coordinator.is_round_in_flight() {
            return Box::new(|_| {});
        }
        let reports = self.reports.clone();
        Box::new(move |report| {
            let _ = reports.send(report);
        })
    }
}
