//! Simulation Controller (C9): a stateless facade wrapping per-session
//! operations, enforcing guardrails and phase legality around the Tick
//! Engine. Grounded on spec.md §4.9; the guardrail-before-mutation pattern
//! mirrors how [`crate::state_machine::transition`] fails closed before
//! ever touching `session.phase`.

use std::sync::Arc;

use chrono::Utc;

use crate::errors::{ControllerError, GuardrailBreach, ValidationError};
use crate::event::{Event, EventType};
use crate::event_log::EventLog;
use crate::graph;
use crate::message_bus::{self, MessageContent};
use crate::session::{Phase, Session, SimulationMode, TickStatus};
use crate::tick_engine::{TickEngine, TickResult};

/// Configuration fields [`SimulationController::configure`] may set.
#[derive(Debug, Clone, Default)]
pub struct SimulationConfig {
    pub simulation_mode: Option<SimulationMode>,
    pub auto_delay_ms: Option<i64>,
    pub tick_budget: Option<u64>,
    pub use_real_llm: Option<bool>,
    pub max_cost_usd: Option<f64>,
    pub tick_rate_limit_ms: Option<i64>,
}

/// Projection of a session's runtime state, for `get_state`-style queries.
#[derive(Debug, Clone)]
pub struct SimulationState {
    pub tick_index: i64,
    pub tick_status: TickStatus,
    pub simulation_mode: SimulationMode,
    pub cost_usd: f64,
    pub max_cost_usd: f64,
    pub main_task: Option<String>,
    pub initial_prompt: Option<String>,
    pub agent_count: usize,
    pub edge_count: usize,
    pub final_answer: Option<String>,
}

pub struct SimulationController {
    event_log: Arc<EventLog>,
    tick_engine: Arc<TickEngine>,
}

impl SimulationController {
    pub fn new(event_log: Arc<EventLog>, tick_engine: Arc<TickEngine>) -> Self {
        Self { event_log, tick_engine }
    }

    fn emit(&self, session: &Session, event_type: EventType, message: impl Into<String>, metadata: serde_json::Value) {
        self.event_log.append_best_effort(
            Event::new(event_type, session.session_id.clone(), message)
                .with_phase(session.phase.to_string())
                .with_metadata(metadata),
        );
    }

    /// Set simulation mode, auto-delay, tick budget, LLM mode, cost cap, and
    /// rate limit. Rejected in a terminal phase or while running.
    pub fn configure(&self, session: &mut Session, cfg: SimulationConfig) -> Result<(), ControllerError> {
        if session.phase.is_terminal() {
            return Err(ValidationError("cannot configure a session in a terminal phase".to_string()).into());
        }
        if session.tick_status == TickStatus::Running {
            return Err(ValidationError("cannot configure a session while it is running".to_string()).into());
        }

        if let Some(mode) = cfg.simulation_mode {
            session.simulation_mode = mode;
        }
        if cfg.auto_delay_ms.is_some() {
            session.auto_delay_ms = cfg.auto_delay_ms;
        }
        if cfg.tick_budget.is_some() {
            session.tick_budget = cfg.tick_budget;
        }
        if let Some(use_real_llm) = cfg.use_real_llm {
            session.use_real_llm = use_real_llm;
        }
        if let Some(max_cost) = cfg.max_cost_usd {
            session.max_cost_usd = max_cost;
        }
        if let Some(rate_limit) = cfg.tick_rate_limit_ms {
            session.tick_rate_limit_ms = rate_limit;
        }

        self.emit(
            session,
            EventType::SimulationConfigured,
            "Simulation configured",
            serde_json::json!({
                "simulation_mode": session.simulation_mode,
                "use_real_llm": session.use_real_llm,
                "max_cost_usd": session.max_cost_usd,
                "tick_rate_limit_ms": session.tick_rate_limit_ms,
            }),
        );
        Ok(())
    }

    /// Start the simulation: requires a non-terminal phase, a non-running
    /// tick status, a non-empty roster where every agent has a role, a
    /// non-empty graph, and non-empty `main_task`/`initial_prompt`/
    /// `first_agent_id` (the latter referencing a roster member).
    pub fn start(&self, session: &mut Session, main_task: impl Into<String>, initial_prompt: impl Into<String>, first_agent_id: impl Into<String>) -> Result<(), ControllerError> {
        if session.phase.is_terminal() {
            return Err(ValidationError("cannot start a session in a terminal phase".to_string()).into());
        }
        if session.tick_status == TickStatus::Running {
            return Err(ValidationError("session is already running".to_string()).into());
        }
        if session.agents.is_empty() {
            return Err(ValidationError("roster must not be empty".to_string()).into());
        }
        if session.agents.iter().any(|a| a.role.is_none()) {
            return Err(ValidationError("every roster agent must have a role".to_string()).into());
        }
        if session.agent_graph.is_empty() {
            return Err(ValidationError("communication graph must not be empty".to_string()).into());
        }
        graph::validate(&session.agent_graph, &session.agent_ids())?;

        let main_task = main_task.into();
        let initial_prompt = initial_prompt.into();
        let first_agent_id = first_agent_id.into();

        if main_task.is_empty() {
            return Err(ValidationError("main_task must not be empty".to_string()).into());
        }
        if initial_prompt.is_empty() {
            return Err(ValidationError("initial_prompt must not be empty".to_string()).into());
        }
        if first_agent_id.is_empty() || !session.has_agent(&first_agent_id) {
            return Err(ValidationError(format!("first_agent_id '{}' does not reference a roster member", first_agent_id)).into());
        }

        session.main_task = Some(main_task);
        session.initial_prompt = Some(initial_prompt);
        session.first_agent_id = Some(first_agent_id);
        session.tick_index = 0;
        session.tick_status = TickStatus::Running;
        session.expected_responses.clear();
        session.final_answer = None;

        self.emit(
            session,
            EventType::SimulationStarted,
            "Simulation started",
            serde_json::json!({
                "main_task": session.main_task,
                "first_agent_id": session.first_agent_id,
            }),
        );
        Ok(())
    }

    /// Reset tick counters, queue, message counter, delegation tracking, and
    /// the event log. `preserve_workflow=false` additionally clears the
    /// roster, roles, models, graph, and main task.
    pub fn reset(&self, session: &mut Session, preserve_workflow: bool) -> Result<(), ControllerError> {
        if session.phase.is_terminal() {
            return Err(ValidationError("cannot reset a session in a terminal phase".to_string()).into());
        }

        self.tick_engine.clear_session_dispatches(&session.session_id);

        session.tick_index = 0;
        session.tick_status = TickStatus::Idle;
        session.last_tick_timestamp = None;
        session.message_queue.clear();
        session.message_counter = 0;
        session.expected_responses.clear();
        session.final_answer = None;
        session.cost_usd = 0.0;
        session.agent_conversations.clear();

        if !preserve_workflow {
            session.agents.clear();
            session.agent_graph.clear();
            session.main_task = None;
            session.initial_prompt = None;
            session.first_agent_id = None;
        }

        if let Err(err) = self.event_log.truncate(&session.session_id) {
            log::warn!("failed to truncate event log for session {}: {}", session.session_id, err);
        }

        self.emit(
            session,
            EventType::SimulationReset,
            "Simulation reset",
            serde_json::json!({"preserve_workflow": preserve_workflow}),
        );
        Ok(())
    }

    /// Pre-tick guardrails (spec.md §4.8 Step 0): cost budget, then
    /// (real-LLM mode only) the rate-limit interval. Neither check mutates
    /// `session` on failure.
    fn check_guardrails(&self, session: &Session) -> Result<(), GuardrailBreach> {
        if session.cost_usd >= session.max_cost_usd {
            return Err(GuardrailBreach::CostExceeded { cost_usd: session.cost_usd, max_cost_usd: session.max_cost_usd });
        }
        if session.use_real_llm {
            if let Some(last) = session.last_tick_timestamp {
                let elapsed_ms = (Utc::now() - last).num_milliseconds();
                if elapsed_ms < session.tick_rate_limit_ms {
                    return Err(GuardrailBreach::RateLimited { elapsed_ms, required_ms: session.tick_rate_limit_ms });
                }
            }
        }
        Ok(())
    }

    /// Advance one tick. Requires `tick_status=running`. On the very first
    /// tick (empty queue, initial prompt and first agent set), bypass-sends
    /// the initial prompt to the first agent before calling the Tick Engine.
    pub async fn advance_tick(&self, session: &mut Session) -> Result<TickResult, ControllerError> {
        if session.tick_status != TickStatus::Running {
            return Err(ValidationError("session is not running".to_string()).into());
        }
        self.check_guardrails(session)?;

        if session.message_queue.is_empty() {
            if let (Some(prompt), Some(first_agent)) = (session.initial_prompt.clone(), session.first_agent_id.clone()) {
                let content = MessageContent::text(prompt).expecting_response();
                message_bus::send(session, &self.event_log, "user", &first_agent, content, true);
            }
        }

        Ok(self.tick_engine.advance_tick(session).await)
    }

    /// Advance `n` ticks in sequence, stopping early if the session stops
    /// running (e.g. delegation completes, or a guardrail trips).
    pub async fn advance_ticks(&self, session: &mut Session, n: usize) -> Result<Vec<TickResult>, ControllerError> {
        let mut results = Vec::with_capacity(n);
        for _ in 0..n {
            if session.tick_status != TickStatus::Running {
                break;
            }
            match self.advance_tick(session).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    if results.is_empty() {
                        return Err(err);
                    }
                    break;
                }
            }
        }
        Ok(results)
    }

    /// Pause a running session.
    pub fn pause(&self, session: &mut Session) -> Result<(), ControllerError> {
        if session.tick_status != TickStatus::Running {
            return Err(ValidationError("session is not running".to_string()).into());
        }
        session.tick_status = TickStatus::Paused;
        self.emit(session, EventType::SimulationPaused, "Simulation paused", serde_json::json!({}));
        Ok(())
    }

    /// Stop a running or paused session.
    pub fn stop(&self, session: &mut Session) -> Result<(), ControllerError> {
        if !matches!(session.tick_status, TickStatus::Running | TickStatus::Paused) {
            return Err(ValidationError("session is not running or paused".to_string()).into());
        }
        session.tick_status = TickStatus::Completed;
        Ok(())
    }

    /// Unconditionally fail a session: writes `SESSION_FAILED` and forces
    /// `Phase::Failed`, bypassing exit-criteria checks, regardless of
    /// current phase (spec.md §9 open question #1).
    pub fn fail_session(&self, session: &mut Session, reason: impl Into<String>) {
        let reason = reason.into();
        session.phase = Phase::Failed;
        session.tick_status = TickStatus::Completed;
        self.emit(session, EventType::SessionFailed, format!("Session failed: {}", reason), serde_json::json!({"reason": reason}));
    }

    /// Projection of tick counters, mode, costs, prompts, agents, and graph.
    pub fn get_state(&self, session: &Session) -> SimulationState {
        SimulationState {
            tick_index: session.tick_index,
            tick_status: session.tick_status,
            simulation_mode: session.simulation_mode,
            cost_usd: session.cost_usd,
            max_cost_usd: session.max_cost_usd,
            main_task: session.main_task.clone(),
            initial_prompt: session.initial_prompt.clone(),
            agent_count: session.agents.len(),
            edge_count: session.agent_graph.len(),
            final_answer: session.final_answer.clone(),
        }
    }
}
