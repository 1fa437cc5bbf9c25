use tempchain_core::protocol::ProtocolError;
use tempchain_core::sensor::SensorError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Connection error: {0}")]
    Connection(#[from] tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type ClientResult<T> = Result<T, ClientError>;
