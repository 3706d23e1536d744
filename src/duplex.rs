//! The remote agent duplex transport abstraction (part of C6).
//!
//! spec.md §6 specifies frame shapes over "the repository uses WebSockets;
//! any ordered, framed duplex transport suffices." [`Duplex`] captures
//! exactly that: an ordered, framed, bidirectional JSON channel. The tick
//! engine and [`crate::connection_manager::RemoteConnectionManager`] only
//! ever talk to this trait, so they stay unit-testable against an in-memory
//! implementation; [`crate::ws_server`] (feature `server`) supplies the one
//! concrete binding, over `axum`'s websocket extractor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Close codes the server uses when it drops a duplex connection.
pub const CLOSE_NOT_REGISTERED_FIRST: u16 = 4001;
pub const CLOSE_REPLACED: u16 = 4002;
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4003;

/// One frame of the remote agent protocol. `#[serde(tag = "type")]` mirrors
/// the `{type, ...}` envelope every frame in spec.md §6 uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DuplexFrame {
    Register {
        agent_id: String,
        auth_token: String,
        capabilities: Vec<String>,
        #[serde(default)]
        workdir: Option<String>,
        #[serde(default)]
        metadata: Option<Value>,
    },
    Registered {
        session_id: String,
        agent_id: String,
        message: String,
    },
    Dispatch {
        message_id: String,
        agent_id: String,
        content: Value,
        context: Value,
        #[serde(default)]
        session_id: Option<String>,
    },
    Progress {
        message_id: String,
        agent_id: String,
        status: String,
        progress_text: String,
        #[serde(default)]
        metadata: Option<Value>,
    },
    Response {
        message_id: String,
        agent_id: String,
        content: Value,
        #[serde(default)]
        usage: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    Heartbeat {
        agent_id: String,
        timestamp: String,
    },
}

/// An ordered, framed, bidirectional JSON channel to one remote agent
/// process. Implementations need not be thread-safe on their own; the
/// connection manager serializes all sends per connection.
#[async_trait]
pub trait Duplex: Send + Sync {
    /// Send one frame to the remote peer.
    async fn send(&self, frame: DuplexFrame) -> Result<(), String>;

    /// Close the channel with a protocol close code and human-readable reason.
    async fn close(&self, code: u16, reason: &str);
}

/// An in-memory [`Duplex`] for tests, exposed unconditionally so both unit
/// tests and `tests/*.rs` integration tests can exercise the connection
/// manager without a real socket.
pub mod mock {
    use super::*;
    use tokio::sync::Mutex;

    /// An in-memory [`Duplex`] that records every frame sent to it, for
    /// unit tests that don't need a real socket.
    pub struct MockDuplex {
        pub sent: Mutex<Vec<DuplexFrame>>,
        pub closed: Mutex<Option<(u16, String)>>,
    }

    impl MockDuplex {
        pub fn new() -> Self {
            Self { sent: Mutex::new(Vec::new()), closed: Mutex::new(None) }
        }
    }

    #[async_trait]
    impl Duplex for MockDuplex {
        async fn send(&self, frame: DuplexFrame) -> Result<(), String> {
            self.sent.lock().await.push(frame);
            Ok(())
        }

        async fn close(&self, code: u16, reason: &str) {
            *self.closed.lock().await = Some((code, reason.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockDuplex;
    use super::*;

    #[tokio::test]
    async fn mock_duplex_records_sent_frames() {
        let duplex = MockDuplex::new();
        duplex
            .send(DuplexFrame::Heartbeat { agent_id: "r".into(), timestamp: "now".into() })
            .await
            .unwrap();
        assert_eq!(duplex.sent.lock().await.len(), 1);
    }

    #[test]
    fn frame_round_trips_through_json() {
        let frame = DuplexFrame::Dispatch {
            message_id: "msg-1-1".into(),
            agent_id: "r".into(),
            content: serde_json::json!({"text": "hi"}),
            context: serde_json::json!({}),
            session_id: Some("s-1".into()),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"dispatch\""));
        let _: DuplexFrame = serde_json::from_str(&json).unwrap();
    }
}
