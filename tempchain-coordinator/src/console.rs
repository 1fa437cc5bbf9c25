//! # Operator console
//!
//! Line-oriented prompt driving the coordinator. Every command is a short
//! flag (`-a`, `-s`, `-c`, `-p`, `-pa`, `-e`) or its long alias. Invalid
//! input is reported and the prompt returns without touching coordinator
//! state. Round reports are printed as soon as they arrive, between
//! prompts.

use std::str::FromStr;

use tempchain_core::agent_registry::AgentError;
use tempchain_core::round::{RoundReport, RoundSpec, RoundSpecError};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::service::CoordinatorHandle;

const HELP: &[&str] = &[
    "-a  (broadcast) -> broadcast task to all clients",
    "-s  (set)       -> set task for every client",
    "-c  (list)      -> print connected clients",
    "-p  (pause)     -> pause target client",
    "-pa (pause-all) -> pause all clients",
    "-e  (exit)      -> exit",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Broadcast,
    Set,
    List,
    Pause,
    PauseAll,
    Exit,
}

impl FromStr for ConsoleCommand {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "-a" | "broadcast" => Ok(Self::Broadcast),
            "-s" | "set" => Ok(Self::Set),
            "-c" | "list" => Ok(Self::List),
            "-p" | "pause" => Ok(Self::Pause),
            "-pa" | "pause-all" => Ok(Self::PauseAll),
            "-e" | "exit" => Ok(Self::Exit),
            other => Err(InputError::UnknownCommand(other.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("{0} is not a valid command")]
    UnknownCommand(String),
    #[error("Number of transactions must be a positive integer, got {0:?}")]
    InvalidCount(String),
    #[error("Frequency must be a non-negative number, got {0:?}")]
    InvalidFrequency(String),
    #[error("Sleep time must be greater than zero")]
    InvalidHours(String),
    #[error(transparent)]
    Round(#[from] RoundSpecError),
}

pub type InputResult<T> = Result<T, InputError>;

/// Seconds between reads for `frequency` reads per second; 0 means no pause.
pub fn interval_for_frequency(frequency: f64) -> f64 {
    if frequency == 0.0 { 0.0 } else { 1.0 / frequency }
}

pub fn parse_round_params(
    transactions: &str,
    frequency: &str,
    endpoint: &str,
) -> InputResult<RoundSpec> {
    let transactions = transactions.trim();
    let count = transactions
        .parse::<u32>()
        .ok()
        .filter(|count| *count > 0)
        .ok_or_else(|| InputError::InvalidCount(transactions.to_string()))?;

    let frequency_text = frequency.trim();
    let frequency = frequency_text
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && *f >= 0.0)
        .ok_or_else(|| InputError::InvalidFrequency(frequency_text.to_string()))?;

    let spec = RoundSpec::new(
        count,
        interval_for_frequency(frequency),
        Some(endpoint.trim().to_string()),
    )?;
    Ok(spec)
}

pub fn parse_hours(hours: &str) -> InputResult<f64> {
    let hours = hours.trim();
    hours
        .parse::<f64>()
        .ok()
        .filter(|h| h.is_finite() && *h > 0.0)
        .ok_or_else(|| InputError::InvalidHours(hours.to_string()))
}

pub struct Console<R, W> {
    input: Lines<R>,
    output: W,
    coordinator: CoordinatorHandle,
    reports: mpsc::UnboundedReceiver<RoundReport>,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        input: R,
        output: W,
        coordinator: CoordinatorHandle,
        reports: mpsc::UnboundedReceiver<RoundReport>,
    ) -> Self {
        Self {
            input: input.lines(),
            output,
            coordinator,
            reports,
        }
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    /// Runs until `exit` or end of input.
    pub async fn run(&mut self) -> AppResult<()> {
        self.print_help().await?;
        loop {
            self.write("cmd: ").await?;
            let line = tokio::select! {
                biased;
                Some(report) = self.reports.recv() => {
                    self.print_report(&report).await?;
                    continue;
                }
                line = self.input.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            let command = match line.parse::<ConsoleCommand>() {
                Ok(command) => command,
                Err(e) => {
                    self.say(e.to_string()).await?;
                    self.print_help().await?;
                    continue;
                }
            };
            debug!("Console command {:?}", command);
            match self.execute(command).await {
                Ok(true) => {}
                Ok(false) | Err(AppError::InputClosed) => break,
                Err(e) => return Err(e),
            }
        }
        self.say("Shutting down").await?;
        Ok(())
    }

    /// Returns `false` when the console should stop.
    async fn execute(&mut self, command: ConsoleCommand) -> AppResult<bool> {
        match command {
            ConsoleCommand::Broadcast => self.broadcast().await?,
            ConsoleCommand::Set => self.set_tasks().await?,
            ConsoleCommand::List => self.print_agents().await?,
            ConsoleCommand::Pause => self.pause_one().await?,
            ConsoleCommand::PauseAll => self.pause_all().await?,
            ConsoleCommand::Exit => return Ok(false),
        }
        Ok(true)
    }

    async fn broadcast(&mut self) -> AppResult<()> {
        let spec = match self.read_round_params().await? {
            Ok(spec) => spec,
            Err(e) => return self.say(e.to_string()).await,
        };
        let round = self.coordinator.broadcast(spec).await?;
        self.say(format!("Round {} broadcast", round)).await
    }

    async fn set_tasks(&mut self) -> AppResult<()> {
        let mut assignments = Vec::new();
        for agent_id in self.coordinator.list_agents().await? {
            self.say(format!("==>{}<==", agent_id)).await?;
            match self.read_round_params().await? {
                Ok(spec) => assignments.push((agent_id, spec)),
                Err(e) => self.say(format!("{}, skipping {}", e, agent_id)).await?,
            }
        }
        if assignments.is_empty() {
            return self.say("No tasks assigned").await;
        }
        let targets = assignments.len();
        let round = self.coordinator.assign(assignments).await?;
        self.say(format!("Round {} assigned to {} clients", round, targets))
            .await
    }

    async fn print_agents(&mut self) -> AppResult<()> {
        let agents = self.coordinator.list_agents().await?;
        self.say(format!("Clients connected: {}", agents.len()))
            .await?;
        for agent_id in agents {
            self.say(format!(">{}", agent_id)).await?;
        }
        Ok(())
    }

    async fn pause_one(&mut self) -> AppResult<()> {
        let address = self.prompt("Client address").await?;
        let hours = self.prompt("Hours to sleep").await?;
        let hours = match parse_hours(&hours) {
            Ok(hours) => hours,
            Err(e) => return self.say(e.to_string()).await,
        };
        match self.coordinator.pause(address.trim(), hours).await {
            Ok(()) => Ok(()),
            Err(AppError::Agent(AgentError::AgentNotFound { agent_id })) => {
                self.say(format!("Client {} not connected", agent_id)).await
            }
            Err(e) => Err(e),
        }
    }

    async fn pause_all(&mut self) -> AppResult<()> {
        let hours = self.prompt("Hours to sleep").await?;
        let hours = match parse_hours(&hours) {
            Ok(hours) => hours,
            Err(e) => return self.say(e.to_string()).await,
        };
        for failure in self.coordinator.pause_all(hours).await? {
            self.say(failure.to_string()).await?;
        }
        Ok(())
    }

    async fn read_round_params(&mut self) -> AppResult<InputResult<RoundSpec>> {
        let transactions = self.prompt("Number of transactions to execute").await?;
        let frequency = self.prompt("Frequency of measurements (meas/s)").await?;
        let endpoint = self
            .prompt("Blockchain endpoint (empty = leave to the client)")
            .await?;
        Ok(parse_round_params(&transactions, &frequency, &endpoint))
    }

    async fn prompt(&mut self, label: &str) -> AppResult<String> {
        self.write(&format!("{}: ", label)).await?;
        self.input.next_line().await?.ok_or(AppError::InputClosed)
    }

    async fn print_report(&mut self, report: &RoundReport) -> AppResult<()> {
        for outcome in &report.outcomes {
            let suffix = if outcome.implicit { " [disconnected]" } else { "" };
            self.say(format!(
                "Address {}: {} transactions executed in {:.3}s ({:.2} tx/s){}",
                outcome.agent_id,
                outcome.result.completed_count,
                outcome.result.elapsed_seconds,
                outcome.result.throughput(),
                suffix
            ))
            .await?;
        }
        self.say("All pending tasks completed").await
    }

    async fn print_help(&mut self) -> AppResult<()> {
        for line in HELP {
            self.say(*line).await?;
        }
        Ok(())
    }

    async fn say(&mut self, line: impl AsRef<str>) -> AppResult<()> {
        self.output.write_all(line.as_ref().as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await?;
        Ok(())
    }

    async fn write(&mut self, text: &str) -> AppResult<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }
}
