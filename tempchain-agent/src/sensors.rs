//! Sensor sources available to the agent.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempchain_core::sensor::{Reading, SensorError, SensorResult, SensorSource};

use crate::config::SensorConfig;

pub fn from_config(config: &SensorConfig) -> Arc<dyn SensorSource> {
    match config {
        SensorConfig::Thermal { path } => Arc::new(ThermalZoneSensor::new(path.clone())),
        SensorConfig::Simulated { base, seed } => Arc::new(SimulatedSensor::new(*base, *seed)),
    }
}

/// Reads a millidegree Celsius value from a sysfs-style file.
pub struct ThermalZoneSensor {
    path: PathBuf,
}

impl ThermalZoneSensor {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SensorSource for ThermalZoneSensor {
    async fn read(&self) -> SensorResult<Reading> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SensorError::Unavailable {
                message: format!("{}: {}", self.path.display(), e),
            })?;
        let millidegrees: i64 = contents.trim().parse().map_err(|_| SensorError::Malformed {
            message: format!("{:?} in {}", contents.trim(), self.path.display()),
        })?;
        let degrees = (millidegrees as f64 / 1000.0).round() as i64;
        Ok(Reading::now(degrees))
    }
}

const SIMULATED_SPREAD: f64 = 10.0;
const SIMULATED_STEP: f64 = 0.5;

/// Bounded random walk for running without hardware.
pub struct SimulatedSensor {
    base: f64,
    state: Mutex<(f64, StdRng)>,
}

impl SimulatedSensor {
    pub fn new(base: i64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let base = base as f64;
        Self {
            base,
            state: Mutex::new((base, rng)),
        }
    }
}

#[async_trait]
impl SensorSource for SimulatedSensor {
    async fn read(&self) -> SensorResult<Reading> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (current, rng) = &mut *state;
        let step = rng.gen_range(-SIMULATED_STEP..=SIMULATED_STEP);
        *current = (*current + step).clamp(self.base - SIMULATED_SPREAD, self.base + SIMULATED_SPREAD);
        Ok(Reading::now(current.round() as i64))
    }
}
