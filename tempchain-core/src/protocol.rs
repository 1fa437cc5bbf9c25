//! Messages exchanged between the coordinator and its agents.
//!
//! Every frame is a JSON object tagged by `type`. The agent identifier is not
//! part of any frame; it travels as connection metadata (`?addr=` on the
//! WebSocket URL).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::round::{RoundId, RoundResult, RoundSpec, RoundSpecError};

/// Query parameter carrying the agent identifier on connect.
pub const AGENT_ID_PARAM: &str = "addr";

/// Path agents connect to.
pub const AGENTS_PATH: &str = "/agents";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    Task {
        round: RoundId,
        count: u32,
        interval_seconds: f64,
        #[serde(default)]
        endpoint_override: Option<String>,
    },
    Sleep {
        hours: f64,
    },
}

impl CoordinatorMessage {
    pub fn task(round: RoundId, spec: &RoundSpec) -> Self {
        CoordinatorMessage::Task {
            round,
            count: spec.count(),
            interval_seconds: spec.interval_seconds(),
            endpoint_override: spec.endpoint_override().map(str::to_string),
        }
    }

    /// Rebuilds the validated spec of a `task` frame.
    pub fn round_spec(&self) -> Option<ProtocolResult<(RoundId, RoundSpec)>> {
        match self {
            CoordinatorMessage::Task {
                round,
                count,
                interval_seconds,
                endpoint_override,
            } => Some(
                RoundSpec::new(*count, *interval_seconds, endpoint_override.clone())
                    .map(|spec| (*round, spec))
                    .map_err(ProtocolError::from),
            ),
            CoordinatorMessage::Sleep { .. } => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Results {
        round: RoundId,
        completed_count: u32,
        elapsed_seconds: f64,
    },
    Err {
        #[serde(default)]
        round: Option<RoundId>,
        message: String,
    },
}

impl AgentMessage {
    pub fn results(round: RoundId, result: RoundResult) -> Self {
        AgentMessage::Results {
            round,
            completed_count: result.completed_count,
            elapsed_seconds: result.elapsed_seconds,
        }
    }

    pub fn err(round: Option<RoundId>, message: impl Into<String>) -> Self {
        AgentMessage::Err {
            round,
            message: message.into(),
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<String> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode<'a, T: Deserialize<'a>>(frame: &'a str) -> ProtocolResult<T> {
    Ok(serde_json::from_str(frame)?)
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid task: {0}")]
    InvalidTask(#[from] RoundSpecError),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
