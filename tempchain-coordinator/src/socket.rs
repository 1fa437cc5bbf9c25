//! One task per agent connection. Outbound directives arrive on the
//! handle's channel and are forwarded to the socket by a writer task; the
//! reader feeds decoded frames into the coordinator's event channel.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tempchain_core::agent_registry::AgentHandle;
use tempchain_core::coordinator::CoordinatorEvent;
use tempchain_core::protocol::{self, AgentMessage};
use tempchain_core::round::AgentId;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

#[tracing::instrument(skip(socket, events))]
pub async fn serve_agent(
    socket: WebSocket,
    agent_id: AgentId,
    events: mpsc::UnboundedSender<CoordinatorEvent>,
) {
    let (handle, mut outbound) = AgentHandle::new();
    let connection = handle.connection();
    let connected = CoordinatorEvent::Connected {
        agent_id: agent_id.clone(),
        handle,
    };
    if events.send(connected).is_err() {
        warn!("Coordinator stopped, refusing {}", agent_id);
        return;
    }

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        // ends when the registry drops the handle
        while let Some(message) = outbound.recv().await {
            let text = match protocol::encode(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode {:?}: {}", message, e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match protocol::decode::<AgentMessage>(text.as_str()) {
                Ok(message) => {
                    let event = CoordinatorEvent::Message {
                        agent_id: agent_id.clone(),
                        connection,
                        message,
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Dropping malformed frame from {}: {}", agent_id, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Connection of {} failed: {}", agent_id, e);
                break;
            }
        }
    }

    writer.abort();
    let _ = events.send(CoordinatorEvent::Disconnected {
        agent_id,
        connection,
    });
}
