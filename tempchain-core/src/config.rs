use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};

use crate::{Error, InternalResult};

/// What the executor does when a sensor read fails mid-round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorFailurePolicy {
    /// Stop dispatching; every operation not yet dispatched counts as failed.
    #[default]
    Abort,
    /// Count this iteration's operation as failed and keep going.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub sensor_failure_policy: SensorFailurePolicy,

    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Private test ledgers usually run with a zero gas price.
    #[serde(default)]
    pub gas_price: u64,

    #[serde(default)]
    pub chain_id: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            sensor_failure_policy: SensorFailurePolicy::default(),
            gas_limit: default_gas_limit(),
            gas_price: 0,
            chain_id: None,
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let file = File::open(path.as_ref()).map_err(|e| {
        Error::Internal(format!(
            "Failed to open config file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Internal(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Internal(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_gas_limit() -> u64 {
    300_000
}

// Duration helpers for serde
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
