//! Session Store (C2): an in-memory map from session id to [`Session`],
//! thread-safe so concurrent API handlers observe a consistent snapshot.
//!
//! Grounded on the concurrent-map pattern `UnifiedMcpServer` uses in
//! `mcp_server.rs` (`Arc<RwLock<HashMap<...>>>`), adapted to a `DashMap`
//! per SPEC_FULL.md §9's note that the Event Log and Connection Manager
//! both reach for `dashmap` for the same reason: many concurrent readers,
//! occasional writers, no single coarse lock serializing unrelated sessions.
//!
//! Per-session mutual exclusion (the "per-session lock" spec.md §5 allows)
//! is a `tokio::sync::Mutex<Session>` held alongside each entry, so one
//! session's in-flight tick never blocks another session's handlers.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};

use super::Session;

/// In-memory map `session_id -> Session`, each wrapped in its own lock.
///
/// No iteration order guarantee, no TTL, matching spec.md §4.2 precisely.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }

    /// Insert a freshly created session, replacing any prior entry with the
    /// same id.
    pub fn create(&self, session: Session) {
        self.sessions.insert(session.session_id.clone(), Arc::new(Mutex::new(session)));
    }

    /// Borrow the shared, lockable handle for `session_id`, if it exists.
    /// Callers `.lock().await` it to read or mutate; this is what gives
    /// `advance_tick` its per-session serialization.
    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Lock and clone a session's current state, for read-only projections
    /// (e.g. `get_state`).
    pub async fn snapshot(&self, session_id: &str) -> Option<Session> {
        let handle = self.get(session_id)?;
        let guard = handle.lock().await;
        Some(guard.clone())
    }

    pub fn delete(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Convenience alias for the guard returned while a session is locked for a
/// tick or mutation.
pub type SessionGuard<'a> = MutexGuard<'a, Session>;
