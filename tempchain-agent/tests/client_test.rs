use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tempchain_agent::client::{AgentClient, ClientSettings};
use tempchain_agent::ledger::LedgerProvider;
use tempchain_agent::sensors::SimulatedSensor;
use tempchain_core::config::SensorFailurePolicy;
use tempchain_core::executor::AgentExecutor;
use tempchain_core::ledger::{
    Ledger, LedgerResult, MethodSelector, OperationTemplate, Receipt, SignedOperation, TxRequest,
};
use tempchain_core::protocol::{self, AgentMessage, CoordinatorMessage};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

struct InstantLedger;

#[async_trait]
impl Ledger for InstantLedger {
    async fn sequence_number(&self, _account: &str) -> LedgerResult<u64> {
        Ok(100)
    }

    async fn sign(&self, request: &TxRequest) -> LedgerResult<SignedOperation> {
        Ok(SignedOperation {
            sequence: request.nonce,
            raw: format!("0x{:x}", request.nonce),
        })
    }

    async fn submit(&self, operation: &SignedOperation) -> LedgerResult<Receipt> {
        Ok(Receipt {
            transaction_hash: format!("0x{}", operation.sequence),
            block_number: Some(1),
        })
    }
}

#[derive(Default)]
struct RecordingProvider {
    endpoints: Mutex<Vec<Option<String>>>,
}

impl LedgerProvider for RecordingProvider {
    fn ledger_for(&self, endpoint: Option<&str>) -> Arc<dyn Ledger> {
        self.endpoints
            .lock()
            .unwrap()
            .push(endpoint.map(str::to_string));
        Arc::new(InstantLedger)
    }
}

fn start_agent(coordinator_url: String, provider: Arc<RecordingProvider>) -> tokio::task::JoinHandle<()> {
    let executor = AgentExecutor::new(
        Arc::new(SimulatedSensor::new(21, Some(1))),
        OperationTemplate {
            from: "0xagent".to_string(),
            contract: "0xcontract".to_string(),
            selector: MethodSelector::new([1, 2, 3, 4]),
            gas_limit: 300_000,
            gas_price: 0,
            chain_id: None,
        },
        SensorFailurePolicy::Abort,
    );
    let client = AgentClient::new(
        ClientSettings {
            coordinator_url,
            agent_id: "0xagent".to_string(),
            reconnect_delay: Duration::from_millis(50),
        },
        Arc::new(executor),
        provider,
    );
    tokio::spawn(async move { client.run().await })
}

async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("agent did not connect")
        .unwrap();
    let mut uri = String::new();
    let socket = accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            uri = request.uri().to_string();
            Ok(response)
        },
    )
    .await
    .unwrap();
    (socket, uri)
}

async fn send(socket: &mut WebSocketStream<TcpStream>, message: &CoordinatorMessage) {
    let text = protocol::encode(message).unwrap();
    socket.send(Message::Text(text)).await.unwrap();
}

async fn next_report(socket: &mut WebSocketStream<TcpStream>) -> Option<AgentMessage> {
    loop {
        match timeout(Duration::from_secs(5), socket.next()).await.ok()?? {
            Ok(Message::Text(text)) => return protocol::decode(&text).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

#[tokio::test]
async fn test_round_then_sleep_then_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let provider = Arc::new(RecordingProvider::default());
    let agent = start_agent(format!("ws://{}", addr), provider.clone());

    let (mut socket, uri) = accept(&listener).await;
    assert_eq!(uri, "/agents?addr=0xagent");

    send(
        &mut socket,
        &CoordinatorMessage::Task {
            round: 7,
            count: 3,
            interval_seconds: 0.0,
            endpoint_override: Some("http://override:8545".to_string()),
        },
    )
    .await;
    match next_report(&mut socket).await {
        Some(AgentMessage::Results {
            round,
            completed_count,
            ..
        }) => {
            assert_eq!(round, 7);
            assert_eq!(completed_count, 3);
        }
        other => panic!("expected results, got {:?}", other),
    }
    assert_eq!(
        *provider.endpoints.lock().unwrap(),
        vec![Some("http://override:8545".to_string())]
    );

    // roughly 70ms
    send(&mut socket, &CoordinatorMessage::Sleep { hours: 0.00002 }).await;
    assert!(next_report(&mut socket).await.is_none());

    let (_socket, uri) = accept(&listener).await;
    assert_eq!(uri, "/agents?addr=0xagent");
    agent.abort();
}

#[tokio::test]
async fn test_reconnects_after_lost_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let agent = start_agent(format!("ws://{}", addr), Arc::new(RecordingProvider::default()));

    let (socket, _) = accept(&listener).await;
    drop(socket);

    let (mut socket, uri) = accept(&listener).await;
    assert_eq!(uri, "/agents?addr=0xagent");

    send(
        &mut socket,
        &CoordinatorMessage::Task {
            round: 1,
            count: 2,
            interval_seconds: 0.0,
            endpoint_override: None,
        },
    )
    .await;
    assert!(matches!(
        next_report(&mut socket).await,
        Some(AgentMessage::Results { round: 1, completed_count: 2, .. })
    ));
    agent.abort();
}
