use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tempchain_coordinator::server::{self, AppState, ServerConfig};
use tempchain_coordinator::service::{CoordinatorHandle, CoordinatorService};
use tempchain_core::protocol::{self, AgentMessage, CoordinatorMessage};
use tempchain_core::round::{RoundReport, RoundSpec};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type AgentSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestCoordinator {
    addr: SocketAddr,
    handle: CoordinatorHandle,
    reports: mpsc::UnboundedReceiver<RoundReport>,
}

async fn start() -> TestCoordinator {
    let (service, channels) = CoordinatorService::new();
    tokio::spawn(service.run());

    let listener = server::bind(&ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
    })
    .await
    .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(
        listener,
        AppState::new(channels.events),
        std::future::pending(),
    ));

    TestCoordinator {
        addr,
        handle: channels.handle,
        reports: channels.reports,
    }
}

impl TestCoordinator {
    async fn connect(&self, agent_id: &str) -> AgentSocket {
        let url = format!("ws://{}/agents?addr={}", self.addr, agent_id);
        let (socket, _) = connect_async(url).await.unwrap();
        socket
    }

    async fn wait_for_agents(&self, expected: usize) {
        for _ in 0..100 {
            if self.handle.list_agents().await.unwrap().len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} connected agents", expected);
    }

    async fn next_report(&mut self) -> RoundReport {
        timeout(Duration::from_secs(5), self.reports.recv())
            .await
            .expect("round did not complete")
            .unwrap()
    }
}

async fn next_directive(socket: &mut AgentSocket) -> CoordinatorMessage {
    loop {
        let frame = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no directive")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            return protocol::decode(&text).unwrap();
        }
    }
}

async fn reply(socket: &mut AgentSocket, message: &AgentMessage) {
    let text = protocol::encode(message).unwrap();
    socket.send(Message::Text(text)).await.unwrap();
}

#[test]
fn test_server_config_default() {
    let config = ServerConfig::default();
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 8080);
}

#[test]
fn test_server_config_from_json() {
    let config: ServerConfig = tempchain_core::config::from_str(r#"{"port": 9000}"#).unwrap();
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 9000);
}

#[test]
fn test_server_config_from_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(br#"{"host": "127.0.0.1", "port": 9100}"#)
        .unwrap();
    let config: ServerConfig = tempchain_core::config::from_file(file.path()).unwrap();
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 9100);

    let missing = tempchain_core::config::from_file::<ServerConfig, _>(
        file.path().with_extension("missing"),
    );
    assert!(missing.is_err());
}

#[tokio::test]
async fn test_health() {
    let coordinator = start().await;
    let response = reqwest::get(format!("http://{}/health", coordinator.addr))
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_connection_requires_agent_id() {
    let coordinator = start().await;
    let result = connect_async(format!("ws://{}/agents", coordinator.addr)).await;
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 400)
        }
        other => panic!("expected a rejected handshake, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_round_completes_with_result_and_disconnect() {
    let mut coordinator = start().await;
    let mut a = coordinator.connect("0xa").await;
    let mut b = coordinator.connect("0xb").await;
    coordinator.wait_for_agents(2).await;

    let spec = RoundSpec::new(10, 0.2, None).unwrap();
    let round = coordinator.handle.broadcast(spec).await.unwrap();

    for socket in [&mut a, &mut b] {
        match next_directive(socket).await {
            CoordinatorMessage::Task {
                round: assigned,
                count,
                interval_seconds,
                endpoint_override,
            } => {
                assert_eq!(assigned, round);
                assert_eq!(count, 10);
                assert_eq!(interval_seconds, 0.2);
                assert_eq!(endpoint_override, None);
            }
            other => panic!("expected a task, got {:?}", other),
        }
    }

    reply(&mut a, &AgentMessage::err(Some(round), "nonce too low")).await;
    reply(
        &mut a,
        &AgentMessage::Results {
            round,
            completed_count: 10,
            elapsed_seconds: 2.0,
        },
    )
    .await;
    b.close(None).await.unwrap();

    let report = coordinator.next_report().await;
    assert_eq!(report.round, round);
    assert_eq!(report.outcomes.len(), 2);
    let a_outcome = report.outcome("0xa").unwrap();
    assert_eq!(a_outcome.result.completed_count, 10);
    assert!(!a_outcome.implicit);
    let b_outcome = report.outcome("0xb").unwrap();
    assert_eq!(b_outcome.result.completed_count, 0);
    assert!(b_outcome.implicit);

    coordinator.wait_for_agents(1).await;
}

#[tokio::test]
async fn test_pause_all_mid_round() {
    let mut coordinator = start().await;
    let mut a = coordinator.connect("0xa").await;
    coordinator.wait_for_agents(1).await;

    let spec = RoundSpec::new(3, 0.0, Some("http://node:8545".to_string())).unwrap();
    coordinator.handle.broadcast(spec).await.unwrap();
    assert!(matches!(
        next_directive(&mut a).await,
        CoordinatorMessage::Task { endpoint_override: Some(_), .. }
    ));

    let unreachable = coordinator.handle.pause_all(1.0).await.unwrap();
    assert!(unreachable.is_empty());
    assert!(matches!(
        next_directive(&mut a).await,
        CoordinatorMessage::Sleep { hours } if hours == 1.0
    ));
    a.close(None).await.unwrap();

    let report = coordinator.next_report().await;
    assert!(report.outcome("0xa").unwrap().implicit);
}

#[tokio::test]
async fn test_reconnect_replaces_connection() {
    let mut coordinator = start().await;
    let mut first = coordinator.connect("0xa").await;
    coordinator.wait_for_agents(1).await;
    let mut second = coordinator.connect("0xa").await;

    // the replaced connection is closed by the coordinator
    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    coordinator.wait_for_agents(1).await;

    let round = coordinator
        .handle
        .broadcast(RoundSpec::new(1, 0.0, None).unwrap())
        .await
        .unwrap();
    assert!(matches!(
        next_directive(&mut second).await,
        CoordinatorMessage::Task { .. }
    ));
    reply(
        &mut second,
        &AgentMessage::Results {
            round,
            completed_count: 1,
            elapsed_seconds: 0.1,
        },
    )
    .await;

    let report = coordinator.next_report().await;
    assert_eq!(report.total_completed(), 1);
    assert!(!report.outcome("0xa").unwrap().implicit);
}
