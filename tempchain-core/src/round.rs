//! # Rounds
//!
//! A round is one assignment of a fixed number of operations to one agent.
//! The coordinator builds a [`RoundSpec`] per target, the agent answers with
//! exactly one [`RoundResult`], and the coordinator folds the results of every
//! target into a [`RoundReport`] once the last one has arrived.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier an agent declares when it connects (normally its signer account).
pub type AgentId = String;

/// Identifier of one assignment, carried in `task` and echoed back in `results`.
pub type RoundId = u64;

/// Immutable description of one assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSpec {
    count: u32,
    interval_seconds: f64,
    interval: Duration,
    endpoint_override: Option<String>,
}

impl RoundSpec {
    /// Creates a validated spec.
    ///
    /// `count` must be positive and `interval_seconds` a non-negative number of
    /// seconds that fits in a [`Duration`].
    /// An empty endpoint override is treated as no override.
    pub fn new(
        count: u32,
        interval_seconds: f64,
        endpoint_override: Option<String>,
    ) -> RoundSpecResult<Self> {
        if count == 0 {
            return Err(RoundSpecError::ZeroCount);
        }
        if interval_seconds < 0.0 {
            return Err(RoundSpecError::InvalidInterval(interval_seconds));
        }
        let interval = Duration::try_from_secs_f64(interval_seconds)
            .map_err(|_| RoundSpecError::InvalidInterval(interval_seconds))?;
        let endpoint_override = endpoint_override.filter(|e| !e.trim().is_empty());
        Ok(Self {
            count,
            interval_seconds,
            interval,
            endpoint_override,
        })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn interval_seconds(&self) -> f64 {
        self.interval_seconds
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn endpoint_override(&self) -> Option<&str> {
        self.endpoint_override.as_deref()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoundSpecError {
    #[error("Round count must be greater than zero")]
    ZeroCount,
    #[error("Round interval must be a representable, non-negative number of seconds: {0}")]
    InvalidInterval(f64),
}

pub type RoundSpecResult<T> = Result<T, RoundSpecError>;

/// Terminal report of one agent for one round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub completed_count: u32,
    pub elapsed_seconds: f64,
}

impl RoundResult {
    /// Result recorded on behalf of an agent that disconnected mid-round.
    pub const IMPLICIT: RoundResult = RoundResult {
        completed_count: 0,
        elapsed_seconds: 0.0,
    };

    pub fn new(completed_count: u32, elapsed: Duration) -> Self {
        Self {
            completed_count,
            elapsed_seconds: elapsed.as_secs_f64(),
        }
    }

    /// Completed operations per second, zero when no time was measured.
    pub fn throughput(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            f64::from(self.completed_count) / self.elapsed_seconds
        } else {
            0.0
        }
    }
}

/// One agent's contribution to a [`RoundReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRoundOutcome {
    pub agent_id: AgentId,
    pub result: RoundResult,
    /// True when the agent disconnected and never sent `results`.
    pub implicit: bool,
}

/// Aggregate handed to the round-complete callback.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoundReport {
    pub round: RoundId,
    pub outcomes: Vec<AgentRoundOutcome>,
}

impl RoundReport {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn total_completed(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| u64::from(o.result.completed_count))
            .sum()
    }

    pub fn outcome(&self, agent_id: &str) -> Option<&AgentRoundOutcome> {
        self.outcomes.iter().find(|o| o.agent_id == agent_id)
    }
}
