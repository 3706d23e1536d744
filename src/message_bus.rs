//! Message Bus (C5): a per-session, graph-gated message queue with delivery
//! bookkeeping. The bus owns the session's `message_queue`; it is never
//! global across sessions.
//!
//! Grounded closely on `original_source/orchestration/coordinator/tick_engine.py`'s
//! `validate_message`/`send_message` — the reason strings and metadata
//! shapes below match it field for field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{Event, EventType};
use crate::event_log::EventLog;
use crate::graph::edge_exists;
use crate::session::Session;

/// The non-ASCII marker spec.md's blocked-reason strings embed: U+219B,
/// RIGHTWARDS ARROW WITH STROKE. Tests assert against this exact codepoint.
pub const BLOCKED_ARROW: char = '\u{219B}';

/// Structured message payload: free text plus the flag set spec.md §3
/// names, and an optional back-reference to the message this one answers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub expect_response: bool,
    #[serde(default)]
    pub is_stub: bool,
    #[serde(default)]
    pub delegation: bool,
    #[serde(default)]
    pub final_answer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stub_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,
    /// Any additional fields a concrete payload carries, preserved
    /// verbatim so round-tripping through history/events never drops data.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Default::default() }
    }

    pub fn expecting_response(mut self) -> Self {
        self.expect_response = true;
        self
    }

    pub fn as_delegation(mut self) -> Self {
        self.delegation = true;
        self.expect_response = true;
        self
    }

    /// Canonical JSON form used for stub-hash computation and history
    /// assembly: sorted keys, no extraneous whitespace.
    pub fn canonical_json(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        canonicalize(&value)
    }
}

/// Serialize a `Value` with sorted object keys and no whitespace, matching
/// `json.dumps(..., sort_keys=True, separators=(",", ":"))` in
/// `original_source`.
pub fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}:{}", serde_json::to_string(k).unwrap(), canonicalize(v)))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", body.join(","))
        }
        other => serde_json::to_string(other).unwrap(),
    }
}

/// One queued or delivered message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub content: MessageContent,
    pub tick_created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_delivered: Option<i64>,
    #[serde(default)]
    pub is_delivered: bool,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

/// Why a `validate` call allowed or blocked a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Allowed,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageValidation {
    pub is_allowed: bool,
    pub status: ValidationStatus,
    pub reason: String,
    pub from_agent: String,
    pub to_agent: String,
}

/// Validate `from -> to` against the roster and communication graph.
///
/// Allowed iff: `from == to` (self-message), `from` is the orchestrator role
/// (broadcast), or an edge (or bidirectional reverse edge) exists. Unknown
/// endpoints block before any graph lookup.
pub fn validate_message(session: &Session, from_agent: &str, to_agent: &str) -> MessageValidation {
    let agent_ids = session.agent_ids();

    if !agent_ids.contains(&from_agent) {
        return MessageValidation {
            is_allowed: false,
            status: ValidationStatus::Blocked,
            reason: format!("Source agent '{}' not configured", from_agent),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
        };
    }
    if !agent_ids.contains(&to_agent) {
        return MessageValidation {
            is_allowed: false,
            status: ValidationStatus::Blocked,
            reason: format!("Target agent '{}' not configured", to_agent),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
        };
    }

    if from_agent == to_agent {
        return MessageValidation {
            is_allowed: true,
            status: ValidationStatus::Allowed,
            reason: "Self-message always allowed".to_string(),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
        };
    }

    if session.is_orchestrator(from_agent) {
        return MessageValidation {
            is_allowed: true,
            status: ValidationStatus::Allowed,
            reason: "Orchestrator can broadcast to any agent".to_string(),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
        };
    }

    if edge_exists(&session.agent_graph, from_agent, to_agent) {
        return MessageValidation {
            is_allowed: true,
            status: ValidationStatus::Allowed,
            reason: format!("Edge {}->{} exists in agent graph", from_agent, to_agent),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
        };
    }

    MessageValidation {
        is_allowed: false,
        status: ValidationStatus::Blocked,
        reason: format!("{} {} {} not allowed", from_agent, BLOCKED_ARROW, to_agent),
        from_agent: from_agent.to_string(),
        to_agent: to_agent.to_string(),
    }
}

/// Send a message, running graph validation unless `bypass` is set (used for
/// system-synthesized messages: the initial prompt, stub replies, LLM
/// replies, the delegation final answer, remote response integration).
///
/// On failure emits `MESSAGE_BLOCKED_BY_GRAPH` and returns `(false, None)`.
/// On success appends to the queue, emits `MESSAGE_SENT`, and returns
/// `(true, Some(message))`.
pub fn send(
    session: &mut Session,
    event_log: &EventLog,
    from_agent: &str,
    to_agent: &str,
    content: MessageContent,
    bypass: bool,
) -> (bool, Option<Message>) {
    if !bypass {
        let validation = validate_message(session, from_agent, to_agent);
        if !validation.is_allowed {
            event_log.append_best_effort(
                Event::new(
                    EventType::MessageBlockedByGraph,
                    session.session_id.clone(),
                    format!("Message blocked: {}", validation.reason),
                )
                .with_phase(session.phase.to_string())
                .with_metadata(serde_json::json!({
                    "from_agent": from_agent,
                    "to_agent": to_agent,
                    "reason": validation.reason,
                    "tick_index": session.tick_index,
                })),
            );
            return (false, None);
        }
    }

    let message_id = session.next_message_id();
    let tick_created = session.tick_index;
    let message = Message {
        message_id,
        from_agent: from_agent.to_string(),
        to_agent: to_agent.to_string(),
        content,
        tick_created,
        tick_delivered: None,
        is_delivered: false,
        is_blocked: false,
        blocked_reason: None,
    };
    session.message_queue.push(message.clone());

    let mut metadata = serde_json::json!({
        "message_id": message.message_id,
        "from_agent": from_agent,
        "to_agent": to_agent,
        "tick_index": tick_created,
        "content": serde_json::to_value(&message.content).unwrap_or(Value::Null),
    });
    if message.content.is_stub {
        metadata["is_stub"] = serde_json::json!(true);
    }

    event_log.append_best_effort(
        Event::new(
            EventType::MessageSent,
            session.session_id.clone(),
            format!("Message sent: {}->{}", from_agent, to_agent),
        )
        .with_phase(session.phase.to_string())
        .with_metadata(metadata),
    );

    (true, Some(message))
}

/// Messages queued for `agent_id` that are neither delivered nor blocked.
pub fn pending_for<'a>(session: &'a Session, agent_id: &str) -> Vec<&'a Message> {
    session
        .message_queue
        .iter()
        .filter(|m| m.to_agent == agent_id && !m.is_delivered && !m.is_blocked)
        .collect()
}

/// Mark a message delivered at `tick_index`. Monotone: never un-delivers.
pub fn deliver(message: &mut Message, tick_index: i64) {
    message.is_delivered = true;
    message.tick_delivered = Some(tick_index);
}

/// Remove all delivered messages from the queue; return the count removed.
pub fn clear_delivered(session: &mut Session) -> usize {
    let before = session.message_queue.len();
    session.message_queue.retain(|m| !m.is_delivered);
    before - session.message_queue.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphEdge;
    use crate::session::{AgentRecord, AgentRole, AgentType};

    fn roster_session() -> Session {
        let mut session = Session::new("s-1");
        session.agents = vec![
            AgentRecord { agent_id: "a".into(), display_name: None, role: Some(AgentRole::Orchestrator), model_id: None, agent_type: AgentType::Local },
            AgentRecord { agent_id: "b".into(), display_name: None, role: Some(AgentRole::Worker), model_id: None, agent_type: AgentType::Local },
            AgentRecord { agent_id: "c".into(), display_name: None, role: Some(AgentRole::Reviewer), model_id: None, agent_type: AgentType::Local },
        ];
        session.agent_graph = vec![GraphEdge::new("a", "b"), GraphEdge::new("b", "c")];
        session
    }

    #[test]
    fn graph_gating_scenario_from_spec() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path());
        let mut session = roster_session();

        let (ok, _) = send(&mut session, &log, "a", "c", MessageContent::text("go"), false);
        assert!(ok, "orchestrator broadcast should succeed");

        let (ok, msg) = send(&mut session, &log, "c", "b", MessageContent::text("go"), false);
        assert!(!ok);
        assert!(msg.is_none());

        assert_eq!(session.message_queue.len(), 1);

        let blocked = log.get_events("s-1", Some(EventType::MessageBlockedByGraph));
        assert_eq!(blocked.len(), 1);
        let reason = blocked[0].metadata.as_ref().unwrap()["reason"].as_str().unwrap();
        assert_eq!(reason, format!("c {} b not allowed", BLOCKED_ARROW));
    }

    #[test]
    fn self_message_always_allowed() {
        let session = roster_session();
        let validation = validate_message(&session, "b", "b");
        assert!(validation.is_allowed);
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let value = serde_json::json!({"b": 1, "a": 2});
        assert_eq!(canonicalize(&value), "{\"a\":2,\"b\":1}");
    }
}
