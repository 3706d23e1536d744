//! Remote agent duplex transport binding (feature `server`): an `axum`
//! websocket route wiring [`DuplexFrame`] JSON frames to
//! [`RemoteConnectionManager`].
//!
//! Grounded on the teacher's optional `axum`/`tower` dependency plus the
//! browser-bridge shape in `swedishembedded-sven`'s `http/ws.rs`
//! (`WebSocketUpgrade` → `on_upgrade` → a `tokio::select!` loop bridging
//! inbound frames to a service handle) — the first message off the socket
//! must be a `register` frame (spec.md §6); anything else closes the
//! connection with code `4001`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use crate::connection_manager::RemoteConnectionManager;
use crate::duplex::{Duplex, DuplexFrame, CLOSE_NOT_REGISTERED_FIRST};

/// Shared state the websocket route needs: the one
/// [`RemoteConnectionManager`] every registered remote agent shares.
#[derive(Clone)]
pub struct WsServerState {
    pub connections: Arc<RemoteConnectionManager>,
}

pub fn router(state: WsServerState) -> Router {
    Router::new().route("/agents/connect", get(upgrade)).with_state(state)
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<WsServerState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Adapts one live `axum` `WebSocket` to the [`Duplex`] trait so the
/// connection manager can address it without knowing it's a websocket.
struct AxumDuplex {
    sender: tokio::sync::Mutex<futures_util::stream::SplitSink<WebSocket, Message>>,
}

#[async_trait::async_trait]
impl Duplex for AxumDuplex {
    async fn send(&self, frame: DuplexFrame) -> Result<(), String> {
        let text = serde_json::to_string(&frame).map_err(|e| e.to_string())?;
        let mut sender = self.sender.lock().await;
        use futures_util::SinkExt;
        sender.send(Message::Text(text.into())).await.map_err(|e| e.to_string())
    }

    async fn close(&self, code: u16, reason: &str) {
        use futures_util::SinkExt;
        let mut sender = self.sender.lock().await;
        let _ = sender
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code,
                reason: reason.to_string().into(),
            })))
            .await;
    }
}

async fn handle_socket(socket: WebSocket, state: WsServerState) {
    use futures_util::StreamExt;

    let (sink, mut receiver) = socket.split();
    let duplex = Arc::new(AxumDuplex { sender: tokio::sync::Mutex::new(sink) });

    // The first message off the wire must be `register` (spec.md §6);
    // anything else closes with 4001.
    let first = receiver.next().await;
    let Some(Ok(Message::Text(text))) = first else {
        duplex.close(CLOSE_NOT_REGISTERED_FIRST, "first message was not text").await;
        return;
    };
    let Ok(DuplexFrame::Register { agent_id, auth_token, capabilities, workdir, metadata }) = serde_json::from_str::<DuplexFrame>(&text) else {
        duplex.close(CLOSE_NOT_REGISTERED_FIRST, "first message must be a register frame").await;
        return;
    };

    let registered = state
        .connections
        .register(agent_id.clone(), duplex.clone() as Arc<dyn Duplex>, auth_token, capabilities, workdir, metadata)
        .await;
    let _ = duplex
        .send(DuplexFrame::Registered {
            session_id: registered.session_id,
            agent_id: registered.agent_id.clone(),
            message: format!("registered agent {}", agent_id),
        })
        .await;

    while let Some(Ok(message)) = receiver.next().await {
        let Message::Text(text) = message else { continue };
        match serde_json::from_str::<DuplexFrame>(&text) {
            Ok(DuplexFrame::Progress { message_id, agent_id: frame_agent, status, progress_text, metadata }) => {
                state.connections.handle_progress(&message_id, &frame_agent, &status, &progress_text, metadata.as_ref()).await;
            }
            Ok(DuplexFrame::Response { message_id, agent_id: frame_agent, content, usage, error }) => {
                state.connections.handle_response(&message_id, &frame_agent, content, usage, error).await;
            }
            Ok(DuplexFrame::Heartbeat { agent_id: frame_agent, .. }) => {
                state.connections.handle_heartbeat(&frame_agent).await;
            }
            Ok(_) => {
                // Server-originated frame types received from a client: ignored
                // (non-structural malformation, per spec.md §7 ProtocolError).
            }
            Err(err) => {
                log::warn!("malformed duplex frame from {}: {}", agent_id, err);
            }
        }
    }

    state.connections.unregister(&agent_id, "connection closed").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::HeartbeatConfig;

    #[test]
    fn router_builds_without_panicking() {
        let connections = RemoteConnectionManager::new(HeartbeatConfig::default());
        let _ = router(WsServerState { connections });
    }
}
