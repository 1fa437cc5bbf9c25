use secrecy::SecretString;
use serde::Deserialize;
use std::{fs::File, io, io::BufReader, path::Path, path::PathBuf, time::Duration};
use tempchain_core::config::{ExecutorConfig, duration_ms};
use tempchain_core::ledger::{MethodSelector, OperationTemplate};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing setting: {0}")]
    Missing(&'static str),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Where readings come from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorConfig {
    /// Millidegree value exposed by the kernel's thermal subsystem
    Thermal {
        #[serde(default = "default_thermal_path")]
        path: PathBuf,
    },
    /// Random walk around `base` degrees
    Simulated {
        #[serde(default = "default_simulated_base")]
        base: i64,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self::Thermal {
            path: default_thermal_path(),
        }
    }
}

/// Agent settings
/// Supported sources(in order of precedence):
/// - CLI arguments(by clap)
/// - Environment variables(by clap)
/// - Dot-env file(by clap and dotenv)
/// - Settings file
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    /// Coordinator base URL
    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,

    /// Ledger endpoint used when a round does not override it
    #[serde(default = "default_provider_url")]
    pub provider_url: String,

    /// Signer account, also the agent's identifier
    #[serde(default)]
    pub account: String,

    /// Address of the storage contract
    #[serde(default)]
    pub contract: String,

    pub method_selector: MethodSelector,

    /// Unlocks the node-side signer when set
    #[serde(default)]
    pub passphrase: Option<SecretString>,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(with = "duration_ms", default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,

    #[serde(with = "duration_ms", default = "default_receipt_poll_interval")]
    pub receipt_poll_interval: Duration,

    #[serde(with = "duration_ms", default = "default_receipt_timeout")]
    pub receipt_timeout: Duration,
}

fn default_coordinator_url() -> String {
    "ws://localhost:8080".to_string()
}

fn default_provider_url() -> String {
    "http://localhost:8545".to_string()
}

fn default_thermal_path() -> PathBuf {
    PathBuf::from("/sys/class/thermal/thermal_zone0/temp")
}

fn default_simulated_base() -> i64 {
    21
}

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_receipt_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_receipt_timeout() -> Duration {
    Duration::from_secs(120)
}

impl AgentSettings {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let file = File::open(path)?;
        let settings = serde_json::from_reader(BufReader::new(file))?;
        Ok(settings)
    }

    /// Applies command-line and environment values; empty values are ignored.
    pub fn with_overrides(
        mut self,
        coordinator_url: Option<String>,
        provider_url: Option<String>,
        account: Option<String>,
        passphrase: Option<String>,
    ) -> Self {
        if let Some(url) = coordinator_url.filter(|v| !v.is_empty()) {
            self.coordinator_url = url;
        }
        if let Some(url) = provider_url.filter(|v| !v.is_empty()) {
            self.provider_url = url;
        }
        if let Some(account) = account.filter(|v| !v.is_empty()) {
            self.account = account;
        }
        if let Some(passphrase) = passphrase.filter(|v| !v.is_empty()) {
            self.passphrase = Some(SecretString::new(Box::from(passphrase)));
        }
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.account.trim().is_empty() {
            return Err(ConfigError::Missing("account"));
        }
        if self.contract.trim().is_empty() {
            return Err(ConfigError::Missing("contract"));
        }
        if self.coordinator_url.trim().is_empty() {
            return Err(ConfigError::Missing("coordinator_url"));
        }
        Ok(())
    }

    pub fn operation_template(&self) -> OperationTemplate {
        OperationTemplate {
            from: self.account.clone(),
            contract: self.contract.clone(),
            selector: self.method_selector,
            gas_limit: self.executor.gas_limit,
            gas_price: self.executor.gas_price,
            chain_id: self.executor.chain_id,
        }
    }
}
