//! Scenario 2 (spec.md §8): a delegation round-trips through five ticks and
//! ends with a synthesized final answer and `tick_status=completed`.

use std::sync::Arc;

use vibeforge::connection_manager::{HeartbeatConfig, RemoteConnectionManager};
use vibeforge::controller::SimulationController;
use vibeforge::event_log::EventLog;
use vibeforge::graph::GraphEdge;
use vibeforge::llm_client::FailingLlmClient;
use vibeforge::session::{AgentRecord, AgentRole, AgentType, Session, TickStatus};
use vibeforge::tick_engine::TickEngine;

fn delegation_session() -> Session {
    let mut session = Session::new("scenario-2");
    session.agents = vec![
        AgentRecord { agent_id: "O".into(), display_name: None, role: Some(AgentRole::Orchestrator), model_id: None, agent_type: AgentType::Local },
        AgentRecord { agent_id: "W1".into(), display_name: None, role: Some(AgentRole::Worker), model_id: None, agent_type: AgentType::Local },
        AgentRecord { agent_id: "W2".into(), display_name: None, role: Some(AgentRole::Worker), model_id: None, agent_type: AgentType::Local },
    ];
    session.agent_graph = vec![GraphEdge::bidirectional("O", "W1"), GraphEdge::bidirectional("O", "W2")];
    session
}

#[tokio::test]
async fn five_ticks_reach_a_synthesized_final_answer() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(EventLog::new(dir.path()));
    let connections = RemoteConnectionManager::new(HeartbeatConfig::default());
    let engine = Arc::new(TickEngine::new(log.clone(), connections, Arc::new(FailingLlmClient)));
    let controller = SimulationController::new(log, engine);

    let mut session = delegation_session();
    controller.start(&mut session, "solve X", "solve X", "O").unwrap();

    // Tick 1: deliver the prompt to O, which triggers delegation to both workers.
    let result = controller.advance_tick(&mut session).await.unwrap();
    assert_eq!(result.new_tick, 1);
    assert_eq!(session.expected_responses.len(), 2);
    assert_eq!(session.tick_status, TickStatus::Running);

    // Ticks 2-3: each delegation is delivered; stub replies are enqueued.
    controller.advance_tick(&mut session).await.unwrap();
    controller.advance_tick(&mut session).await.unwrap();
    assert_eq!(session.tick_status, TickStatus::Running, "delegation isn't complete until both replies are delivered");

    // Ticks 4-5: both replies deliver back to O; the second empties
    // expected_responses and synthesizes the final answer.
    controller.advance_tick(&mut session).await.unwrap();
    controller.advance_tick(&mut session).await.unwrap();

    assert!(session.expected_responses.is_empty());
    assert_eq!(session.tick_status, TickStatus::Completed);
    assert!(session.final_answer.is_some());
}
