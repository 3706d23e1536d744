//! Scenario 6 (spec.md §8): a registered agent that stops heartbeating is
//! dropped by the background sweep with the `4003` close code, and any
//! dispatch addressed to it resolves with an error rather than hanging
//! forever.

use std::sync::Arc;
use std::time::Duration;

use vibeforge::connection_manager::{HeartbeatConfig, RemoteConnectionManager};
use vibeforge::duplex::mock::MockDuplex;
use vibeforge::duplex::CLOSE_HEARTBEAT_TIMEOUT;

#[tokio::test]
async fn silent_connection_is_closed_and_its_dispatch_errors() {
    let connections = RemoteConnectionManager::new(HeartbeatConfig { timeout_seconds: 1, check_interval_seconds: 1 });
    let duplex = Arc::new(MockDuplex::new());
    connections.register("R", duplex.clone(), "tok", vec![], None, None).await;

    let receiver = connections
        .dispatch("R", "msg-1-1", serde_json::json!({"text": "go"}), serde_json::json!({}), "s-1", None)
        .await
        .unwrap();

    // No heartbeat is ever sent for R; the background sweep (1s check
    // interval, 1s timeout) should close it well within this window.
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(!connections.is_connected("R"), "a silent connection must be dropped by the heartbeat sweep");
    assert_eq!(*duplex.closed.lock().await, Some((CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout".to_string())));

    let outcome = receiver.await.unwrap();
    assert!(outcome.error.is_some(), "a dispatch to a heartbeat-timed-out agent must resolve with an error, not hang");
}
