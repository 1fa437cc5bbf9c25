use thiserror::Error;

use crate::agent_registry::AgentError;
use crate::ledger::LedgerError;
use crate::protocol::ProtocolError;
use crate::round::RoundSpecError;
use crate::sensor::SensorError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Round error: {0}")]
    Round(#[from] RoundSpecError),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
