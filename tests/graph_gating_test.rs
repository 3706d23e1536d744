//! Scenario 1 (spec.md §8): orchestrator broadcast succeeds, a
//! non-orchestrator send across a missing edge is blocked with the exact
//! `↛` reason string, and the queue only ever grows by the allowed send.

use vibeforge::event::EventType;
use vibeforge::event_log::EventLog;
use vibeforge::graph::GraphEdge;
use vibeforge::message_bus::{self, MessageContent, BLOCKED_ARROW};
use vibeforge::session::{AgentRecord, AgentRole, AgentType, Session};

fn roster() -> Session {
    let mut session = Session::new("scenario-1");
    session.agents = vec![
        AgentRecord { agent_id: "A".into(), display_name: None, role: Some(AgentRole::Orchestrator), model_id: None, agent_type: AgentType::Local },
        AgentRecord { agent_id: "B".into(), display_name: None, role: Some(AgentRole::Worker), model_id: None, agent_type: AgentType::Local },
        AgentRecord { agent_id: "C".into(), display_name: None, role: Some(AgentRole::Reviewer), model_id: None, agent_type: AgentType::Local },
    ];
    session.agent_graph = vec![GraphEdge::new("A", "B"), GraphEdge::new("B", "C")];
    session
}

#[test]
fn orchestrator_broadcast_succeeds_and_reverse_worker_send_is_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let log = EventLog::new(dir.path());
    let mut session = roster();

    let (ok, _) = message_bus::send(&mut session, &log, "A", "C", MessageContent::text("go"), false);
    assert!(ok, "orchestrator broadcast to any roster member must succeed");

    let (ok, msg) = message_bus::send(&mut session, &log, "C", "B", MessageContent::text("go"), false);
    assert!(!ok, "C has no edge to B and is not the orchestrator");
    assert!(msg.is_none());

    assert_eq!(session.message_queue.len(), 1, "the blocked send must never reach the queue");

    let blocked = log.get_events("scenario-1", Some(EventType::MessageBlockedByGraph));
    assert_eq!(blocked.len(), 1);
    let reason = blocked[0].metadata.as_ref().unwrap()["reason"].as_str().unwrap();
    assert_eq!(reason, format!("C {} B not allowed", BLOCKED_ARROW));
}
