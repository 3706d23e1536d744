//! Scenario 4 (spec.md §8): in real-LLM mode, an `advance_tick` issued
//! immediately after the last one is rate-limited; waiting out the interval
//! lets the next call through.

use std::sync::Arc;
use std::time::Duration;

use vibeforge::connection_manager::{HeartbeatConfig, RemoteConnectionManager};
use vibeforge::controller::SimulationController;
use vibeforge::errors::{ControllerError, GuardrailBreach};
use vibeforge::event_log::EventLog;
use vibeforge::graph::GraphEdge;
use vibeforge::llm_client::DryRunLlmClient;
use vibeforge::session::{AgentRecord, AgentRole, AgentType, Session};
use vibeforge::tick_engine::TickEngine;

#[tokio::test]
async fn immediate_retick_is_rate_limited_then_succeeds_after_the_interval() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(EventLog::new(dir.path()));
    let connections = RemoteConnectionManager::new(HeartbeatConfig::default());
    let engine = Arc::new(TickEngine::new(log.clone(), connections, Arc::new(DryRunLlmClient)));
    let controller = SimulationController::new(log, engine);

    let mut session = Session::new("scenario-4");
    session.agents = vec![
        AgentRecord { agent_id: "O".into(), display_name: None, role: Some(AgentRole::Orchestrator), model_id: None, agent_type: AgentType::Local },
        AgentRecord { agent_id: "W".into(), display_name: None, role: Some(AgentRole::Worker), model_id: None, agent_type: AgentType::Local },
    ];
    session.agent_graph = vec![GraphEdge::bidirectional("O", "W")];
    controller.start(&mut session, "task", "go", "O").unwrap();

    session.use_real_llm = true;
    session.tick_rate_limit_ms = 250;

    controller.advance_tick(&mut session).await.unwrap();

    let err = controller.advance_tick(&mut session).await.unwrap_err();
    assert!(matches!(err, ControllerError::Guardrail(GuardrailBreach::RateLimited { .. })));

    tokio::time::sleep(Duration::from_millis(300)).await;
    controller.advance_tick(&mut session).await.unwrap();
}
