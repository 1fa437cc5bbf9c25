//! # Agent connection
//!
//! Keeps one WebSocket session to the coordinator open at a time. Task
//! directives are queued to a round worker that runs them one after the
//! other; a sleep directive ends the session, stops the worker's pacing
//! loop and reconnects with the same identifier once the pause is over.
//! Operations that were already dispatched keep settling in the background.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tempchain_core::executor::AgentExecutor;
use tempchain_core::protocol::{self, AGENT_ID_PARAM, AGENTS_PATH, AgentMessage, CoordinatorMessage};
use tempchain_core::round::{AgentId, RoundId, RoundResult, RoundSpec};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::ClientResult;
use crate::ledger::LedgerProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub coordinator_url: String,
    pub agent_id: AgentId,
    pub reconnect_delay: Duration,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEnd {
    Sleep(Duration),
    Lost,
}

/// Length of a sleep directive; `None` for non-positive or unrepresentable hours.
pub fn sleep_duration(hours: f64) -> Option<Duration> {
    if !hours.is_finite() || hours <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(hours * 3600.0).ok()
}

pub fn connect_url(coordinator_url: &str, agent_id: &str) -> String {
    format!(
        "{}{}?{}={}",
        coordinator_url.trim_end_matches('/'),
        AGENTS_PATH,
        AGENT_ID_PARAM,
        urlencoding::encode(agent_id)
    )
}

pub struct AgentClient {
    settings: ClientSettings,
    executor: Arc<AgentExecutor>,
    ledgers: Arc<dyn LedgerProvider>,
}

impl AgentClient {
    pub fn new(
        settings: ClientSettings,
        executor: Arc<AgentExecutor>,
        ledgers: Arc<dyn LedgerProvider>,
    ) -> Self {
        Self {
            settings,
            executor,
            ledgers,
        }
    }

    /// Connects, serves directives and reconnects forever.
    pub async fn run(&self) {
        loop {
            let pause = match self.session().await {
                Ok(SessionEnd::Sleep(pause)) => {
                    info!("Sleeping for {:.2} hours", pause.as_secs_f64() / 3600.0);
                    pause
                }
                Ok(SessionEnd::Lost) => {
                    warn!("Connection to coordinator lost");
                    self.settings.reconnect_delay
                }
                Err(e) => {
                    warn!(
                        "Failed to connect to {}: {}",
                        self.settings.coordinator_url, e
                    );
                    self.settings.reconnect_delay
                }
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// Serves one connection until it is lost or a sleep directive arrives.
    #[tracing::instrument(skip(self), fields(agent_id = %self.settings.agent_id))]
    pub async fn session(&self) -> ClientResult<SessionEnd> {
        let url = connect_url(&self.settings.coordinator_url, &self.settings.agent_id);
        let (socket, _) = connect_async(url.as_str()).await?;
        info!("Connected to {}", self.settings.coordinator_url);
        let (mut sink, mut stream) = socket.split();

        let (outbound_tx, mut outbound) = mpsc::unbounded_channel();
        let (rounds_tx, rounds) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_rounds(
            self.executor.clone(),
            self.ledgers.clone(),
            rounds,
            outbound_tx.clone(),
        ));

        let end = loop {
            tokio::select! {
                Some(message) = outbound.recv() => {
                    let text = match protocol::encode(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode {:?}: {}", message, e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!("Send failed: {}", e);
                        break SessionEnd::Lost;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(end) = on_directive(&text, &rounds_tx, &outbound_tx) {
                            break end;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break SessionEnd::Lost,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Receive failed: {}", e);
                        break SessionEnd::Lost;
                    }
                }
            }
        };

        worker.abort();
        let _ = sink.close().await;
        Ok(end)
    }
}

fn on_directive(
    text: &str,
    rounds: &mpsc::UnboundedSender<(RoundId, RoundSpec)>,
    outbound: &mpsc::UnboundedSender<AgentMessage>,
) -> Option<SessionEnd> {
    let message = match protocol::decode::<CoordinatorMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Ignoring malformed directive: {}", e);
            return None;
        }
    };

    match &message {
        CoordinatorMessage::Sleep { hours } => match sleep_duration(*hours) {
            Some(pause) => Some(SessionEnd::Sleep(pause)),
            None => {
                warn!("Ignoring sleep directive of {} hours", hours);
                None
            }
        },
        CoordinatorMessage::Task { round, .. } => {
            let round = *round;
            match message.round_spec() {
                Some(Ok((_, spec))) => {
                    info!(
                        "txs: {} sleep: {} endpoint: {:?}",
                        spec.count(),
                        spec.interval_seconds(),
                        spec.endpoint_override()
                    );
                    let _ = rounds.send((round, spec));
                }
                Some(Err(e)) => {
                    error!("Rejecting round {}: {}", round, e);
                    let _ = outbound.send(AgentMessage::err(Some(round), e.to_string()));
                    let _ = outbound.send(AgentMessage::results(round, RoundResult::IMPLICIT));
                }
                None => {}
            }
            None
        }
    }
}

async fn run_rounds(
    executor: Arc<AgentExecutor>,
    ledgers: Arc<dyn LedgerProvider>,
    mut rounds: mpsc::UnboundedReceiver<(RoundId, RoundSpec)>,
    outbound: mpsc::UnboundedSender<AgentMessage>,
) {
    while let Some((round, spec)) = rounds.recv().await {
        let ledger = ledgers.ledger_for(spec.endpoint_override());
        let outcome = executor
            .run_round(round, &spec, ledger, outbound.clone())
            .await;
        info!(
            "Round {}: {} transactions executed in {:.3}s",
            round, outcome.result.completed_count, outcome.result.elapsed_seconds
        );
        if outbound
            .send(AgentMessage::results(round, outcome.result))
            .is_err()
        {
            break;
        }
    }
}
