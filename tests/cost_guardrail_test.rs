//! Scenario 3 (spec.md §8): a session whose cost already meets or exceeds
//! its cap is blocked from advancing, with no mutation to `tick_index`.

use std::sync::Arc;

use vibeforge::connection_manager::{HeartbeatConfig, RemoteConnectionManager};
use vibeforge::controller::SimulationController;
use vibeforge::errors::{ControllerError, GuardrailBreach};
use vibeforge::event_log::EventLog;
use vibeforge::graph::GraphEdge;
use vibeforge::llm_client::FailingLlmClient;
use vibeforge::session::{AgentRecord, AgentRole, AgentType, Session};
use vibeforge::tick_engine::TickEngine;

#[tokio::test]
async fn cost_over_budget_blocks_advance_tick_without_mutating_state() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(EventLog::new(dir.path()));
    let connections = RemoteConnectionManager::new(HeartbeatConfig::default());
    let engine = Arc::new(TickEngine::new(log.clone(), connections, Arc::new(FailingLlmClient)));
    let controller = SimulationController::new(log, engine);

    let mut session = Session::new("scenario-3");
    session.agents = vec![
        AgentRecord { agent_id: "O".into(), display_name: None, role: Some(AgentRole::Orchestrator), model_id: None, agent_type: AgentType::Local },
        AgentRecord { agent_id: "W".into(), display_name: None, role: Some(AgentRole::Worker), model_id: None, agent_type: AgentType::Local },
    ];
    session.agent_graph = vec![GraphEdge::bidirectional("O", "W")];
    controller.start(&mut session, "task", "go", "O").unwrap();

    session.cost_usd = 2.0;
    session.max_cost_usd = 1.0;
    let before = session.tick_index;

    let err = controller.advance_tick(&mut session).await.unwrap_err();
    assert!(matches!(err, ControllerError::Guardrail(GuardrailBreach::CostExceeded { cost_usd, max_cost_usd }) if cost_usd == 2.0 && max_cost_usd == 1.0));
    assert_eq!(session.tick_index, before);
}
