use std::future::Future;
use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tempchain_core::coordinator::CoordinatorEvent;
use tempchain_core::protocol::AGENTS_PATH;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::socket::serve_agent;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Shared with every connection task.
#[derive(Clone)]
pub struct AppState {
    events: mpsc::UnboundedSender<CoordinatorEvent>,
}

impl AppState {
    pub fn new(events: mpsc::UnboundedSender<CoordinatorEvent>) -> Self {
        Self { events }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub addr: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(AGENTS_PATH, get(connect_agent))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn connect_agent(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    let agent_id = query
        .addr
        .filter(|addr| !addr.trim().is_empty())
        .ok_or(AppError::MissingAgentId)?;
    Ok(ws.on_upgrade(move |socket| serve_agent(socket, agent_id, state.events)))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn bind(config: &ServerConfig) -> AppResult<TcpListener> {
    let addr = format!("{}:{}", config.host, config.port)
        .parse::<SocketAddr>()
        .map_err(|e| AppError::Internal(format!("Invalid listen address: {}", e)))?;
    Ok(TcpListener::bind(addr).await?)
}

/// Serves agent connections until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> AppResult<()> {
    info!("Server connected at {}", listener.local_addr()?);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Binds `config` and serves until `shutdown` resolves.
pub async fn start_server(
    config: ServerConfig,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> AppResult<()> {
    let listener = bind(&config).await?;
    serve(listener, state, shutdown).await
}
