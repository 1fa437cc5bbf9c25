use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One temperature sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Whole degrees Celsius.
    pub value: i64,
    pub taken_at: DateTime<Utc>,
}

impl Reading {
    pub fn now(value: i64) -> Self {
        Self {
            value,
            taken_at: Utc::now(),
        }
    }
}

#[mockall::automock]
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn read(&self) -> SensorResult<Reading>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("Sensor unavailable: {message}")]
    Unavailable { message: String },
    #[error("Malformed sensor value: {message}")]
    Malformed { message: String },
}

pub type SensorResult<T> = Result<T, SensorError>;
