//! The structured, append-only observability event.
//!
//! [`EventType`] enumerates every category the core (and the pre-simulation
//! pipeline it hands off to) can emit; [`Event`] is the persisted record
//! itself. Both round-trip through `serde_json` so `Event::to_json |> parse`
//! is the identity, matching the invariant in spec.md §8.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured event categories for observability.
///
/// The tick engine, message bus, connection manager, and simulation
/// controller emit the lower half of this list directly. The upper half
/// (`WorkspaceInitialized` through `GateEvaluated`) belongs to the
/// pre-simulation pipeline (C10) and is carried here so `Event` has one
/// complete, serializable vocabulary rather than two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkspaceInitialized,
    PhaseTransition,
    IntentProfileCreated,
    BuildSpecCreated,
    ConceptCreated,
    TaskGraphCreated,
    PlanApproved,
    PlanRejected,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    AgentInvoked,
    AgentCompleted,
    LlmRequestSent,
    LlmResponseReceived,
    VerificationStarted,
    VerificationCompleted,
    ModelRouted,
    GateEvaluated,
    Info,
    SessionFailed,
    SessionAborted,
    TickAdvanced,
    MessageSent,
    MessageBlockedByGraph,
    SimulationConfigured,
    SimulationStarted,
    SimulationReset,
    SimulationPaused,
    TickStarted,
    TickCompleted,
    TickBlocked,
    AgentMessageSent,
    TaskDispatched,
    AgentResponse,
    AgentError,
    LlmFailure,
    CostTracking,
}

/// A single persisted, structured event.
///
/// `metadata` is an opaque `serde_json::Value` map — the same shape every
/// filter in [`crate::event_log::EventLog`] inspects by key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Event {
    /// Build a new event stamped with the current UTC time.
    pub fn new(event_type: EventType, session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            session_id: session_id.into(),
            message: message.into(),
            phase: None,
            task_id: None,
            metadata: None,
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Read `metadata.tick_index` as an `i64`, if present and numeric.
    pub fn tick_index(&self) -> Option<i64> {
        self.metadata.as_ref()?.get("tick_index")?.as_i64()
    }

    /// Read the agent identifier a filter should match against: tries
    /// `metadata.agent_id`, then `metadata.from_agent`, then
    /// `metadata.sender`, in that order — mirroring
    /// `original_source`'s `EventLog.get_events_filtered`.
    pub fn agent_id(&self) -> Option<&str> {
        let meta = self.metadata.as_ref()?;
        meta.get("agent_id")
            .or_else(|| meta.get("from_agent"))
            .or_else(|| meta.get("sender"))
            .and_then(|v| v.as_str())
    }
}

/// Build a `PhaseTransition` event with the standard `{from, to, reason}`
/// metadata shape.
pub fn phase_transition_event(
    session_id: impl Into<String>,
    old_phase: impl Into<String>,
    new_phase: impl Into<String>,
    reason: Option<String>,
) -> Event {
    let old_phase = old_phase.into();
    let new_phase = new_phase.into();
    Event::new(
        EventType::PhaseTransition,
        session_id,
        format!("Phase transition: {} -> {}", old_phase, new_phase),
    )
    .with_phase(new_phase.clone())
    .with_metadata(serde_json::json!({
        "from": old_phase,
        "to": new_phase,
        "reason": reason,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::new(EventType::TickAdvanced, "s-1", "Tick advanced: 0 -> 1")
            .with_phase("EXECUTION")
            .with_metadata(serde_json::json!({"old_tick_index": 0, "new_tick_index": 1}));
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type, EventType::TickAdvanced);
        assert_eq!(parsed.session_id, event.session_id);
        assert_eq!(parsed.tick_index(), Some(1));
    }

    #[test]
    fn agent_id_falls_back_through_metadata_keys() {
        let event = Event::new(EventType::MessageSent, "s-1", "x")
            .with_metadata(serde_json::json!({"sender": "agent-b"}));
        assert_eq!(event.agent_id(), Some("agent-b"));
    }
}
