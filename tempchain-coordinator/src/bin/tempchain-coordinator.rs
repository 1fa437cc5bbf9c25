use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tempchain_coordinator::console::Console;
use tempchain_coordinator::server::{self, AppState, ServerConfig};
use tempchain_coordinator::service::CoordinatorService;
use tempchain_core::config;
use tokio::io::{BufReader, stdin, stdout};
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Coordinator of a tempchain agent fleet
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host address to bind to
    #[arg(short = 'H', long, env = "TEMPCHAIN_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "TEMPCHAIN_PORT", default_value_t = 8080)]
    port: u16,

    /// JSON server configuration; overrides host and port
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout belongs to the console
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let server_config = match &cli.config {
        Some(path) => config::from_file::<ServerConfig, _>(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig {
            host: cli.host,
            port: cli.port,
        },
    };

    let (service, channels) = CoordinatorService::new();
    let service_task = tokio::spawn(service.run());

    let listener = server::bind(&server_config)
        .await
        .with_context(|| format!("binding {}:{}", server_config.host, server_config.port))?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server::serve(
        listener,
        AppState::new(channels.events),
        async {
            let _ = shutdown_rx.await;
        },
    ));

    let mut console = Console::new(
        BufReader::new(stdin()),
        stdout(),
        channels.handle,
        channels.reports,
    );
    let outcome = console.run().await;

    info!("Shutting down coordinator");
    let _ = shutdown_tx.send(());
    server_task.abort();
    service_task.abort();
    outcome?;
    Ok(())
}
