use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tempchain_agent::client::{AgentClient, ClientSettings};
use tempchain_agent::config::AgentSettings;
use tempchain_agent::ledger::{JsonRpcLedgerProvider, ReceiptPolling};
use tempchain_agent::sensors;
use tempchain_core::executor::AgentExecutor;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Sensor-to-ledger agent of a tempchain fleet
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to settings file
    #[arg(short, long, env = "TEMPCHAIN_AGENT_CONFIG", default_value = "agent.json")]
    config: PathBuf,

    /// Coordinator URL
    #[arg(long, short = 'u', env = "TEMPCHAIN_COORDINATOR_URL")]
    coordinator_url: Option<String>,

    /// Default ledger endpoint
    #[arg(long, env = "WEB3_PROVIDER_URI")]
    provider_url: Option<String>,

    /// Signer account, also used as agent identifier
    #[arg(long, env = "SIGNER_LOCAL_ADDRESS")]
    account: Option<String>,

    /// Passphrase unlocking the signer account on the node
    #[arg(long, env = "SIGNER_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer())
        .init();

    let settings = AgentSettings::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?
        .with_overrides(
            cli.coordinator_url,
            cli.provider_url,
            cli.account,
            cli.passphrase,
        );
    settings.validate()?;

    let sensor = sensors::from_config(&settings.sensor);
    let probe = sensor.read().await.context("Unable to init the sensor")?;
    info!("Sensor ready, reading {}", probe.value);

    let executor = Arc::new(AgentExecutor::new(
        sensor,
        settings.operation_template(),
        settings.executor.sensor_failure_policy,
    ));
    let ledgers = Arc::new(JsonRpcLedgerProvider::new(
        &settings.provider_url,
        settings.passphrase.clone(),
        ReceiptPolling {
            interval: settings.receipt_poll_interval,
            timeout: settings.receipt_timeout,
        },
    ));
    let client = AgentClient::new(
        ClientSettings {
            coordinator_url: settings.coordinator_url.clone(),
            agent_id: settings.account.clone(),
            reconnect_delay: settings.reconnect_delay,
        },
        executor,
        ledgers,
    );

    client.run().await;
    Ok(())
}
