//! The `Session` aggregate: phase, roster, communication graph, tick state,
//! message queue, per-agent history, delegation tracking, and cost/rate
//! budgets. Field layout follows spec.md §3 directly.
//!
//! `Session` is a plain struct, not wrapped in interior mutability itself;
//! concurrent access is mediated by [`store::SessionStore`], which holds
//! each session behind its own lock (spec.md §4.2, §9's note that the
//! message queue should be exclusively owned by the per-session tick
//! execution path rather than raced on).

pub mod store;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::GraphEdge;
use crate::message_bus::Message;

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Questionnaire,
    BuildSpec,
    Idea,
    PlanReview,
    Execution,
    Clarification,
    Verification,
    Complete,
    Failed,
}

impl Phase {
    /// Phases that admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Questionnaire => "QUESTIONNAIRE",
            Phase::BuildSpec => "BUILD_SPEC",
            Phase::Idea => "IDEA",
            Phase::PlanReview => "PLAN_REVIEW",
            Phase::Execution => "EXECUTION",
            Phase::Clarification => "CLARIFICATION",
            Phase::Verification => "VERIFICATION",
            Phase::Complete => "COMPLETE",
            Phase::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Roster role. `Orchestrator` is privileged to broadcast to any roster
/// agent and to emit the final answer on delegation completion — kept
/// lexically distinct from any pre-simulation "orchestrator" concept per
/// spec.md §9's open question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Orchestrator,
    Foreman,
    Worker,
    Reviewer,
    Fixer,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "orchestrator",
            AgentRole::Foreman => "foreman",
            AgentRole::Worker => "worker",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Fixer => "fixer",
        }
    }
}

/// Whether an agent is handled in-process or over a remote duplex
/// connection managed by [`crate::connection_manager::RemoteConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationMode {
    Manual,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStatus {
    Idle,
    Running,
    Paused,
    Completed,
}

/// One roster entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Option<AgentRole>,
    #[serde(default)]
    pub model_id: Option<String>,
    pub agent_type: AgentType,
}

/// One entry of an agent's conversation history, as assembled by the LLM
/// response generator and replayed on later requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: serde_json::Value,
}

/// The session aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub phase: Phase,

    pub agents: Vec<AgentRecord>,
    pub agent_graph: Vec<GraphEdge>,

    pub tick_index: i64,
    pub tick_status: TickStatus,
    pub last_tick_timestamp: Option<DateTime<Utc>>,

    pub message_queue: Vec<Message>,
    pub message_counter: u64,

    pub agent_conversations: HashMap<String, Vec<HistoryEntry>>,
    pub max_history_depth: usize,

    pub expected_responses: Vec<String>,
    pub final_answer: Option<String>,

    pub cost_usd: f64,
    pub max_cost_usd: f64,

    pub tick_rate_limit_ms: i64,

    pub main_task: Option<String>,
    pub initial_prompt: Option<String>,
    pub first_agent_id: Option<String>,
    pub simulation_mode: SimulationMode,
    pub auto_delay_ms: Option<i64>,
    pub tick_budget: Option<u64>,

    pub use_real_llm: bool,
    pub default_model: String,
    pub default_temperature: f32,

    /// Opaque to the core: intent profile, build spec, concept, task graph.
    pub pre_simulation_artifacts: serde_json::Value,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            phase: Phase::Questionnaire,
            agents: Vec::new(),
            agent_graph: Vec::new(),
            tick_index: 0,
            tick_status: TickStatus::Idle,
            last_tick_timestamp: None,
            message_queue: Vec::new(),
            message_counter: 0,
            agent_conversations: HashMap::new(),
            max_history_depth: 20,
            expected_responses: Vec::new(),
            final_answer: None,
            cost_usd: 0.0,
            max_cost_usd: f64::MAX,
            tick_rate_limit_ms: 0,
            main_task: None,
            initial_prompt: None,
            first_agent_id: None,
            simulation_mode: SimulationMode::Manual,
            auto_delay_ms: None,
            tick_budget: None,
            use_real_llm: false,
            default_model: "gpt-4o-mini".to_string(),
            default_temperature: 0.7,
            pre_simulation_artifacts: serde_json::Value::Null,
        }
    }

    pub fn agent_ids(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.agent_id.as_str()).collect()
    }

    pub fn has_agent(&self, agent_id: &str) -> bool {
        self.agents.iter().any(|a| a.agent_id == agent_id)
    }

    pub fn role_of(&self, agent_id: &str) -> Option<AgentRole> {
        self.agents.iter().find(|a| a.agent_id == agent_id)?.role
    }

    pub fn is_orchestrator(&self, agent_id: &str) -> bool {
        self.role_of(agent_id) == Some(AgentRole::Orchestrator)
    }

    pub fn model_for(&self, agent_id: &str) -> String {
        self.agents
            .iter()
            .find(|a| a.agent_id == agent_id)
            .and_then(|a| a.model_id.clone())
            .unwrap_or_else(|| self.default_model.clone())
    }

    pub fn agent_type_of(&self, agent_id: &str) -> Option<AgentType> {
        Some(self.agents.iter().find(|a| a.agent_id == agent_id)?.agent_type)
    }

    /// Append one history entry for `agent_id`, evicting the oldest entries
    /// once `max_history_depth` is exceeded (FIFO eviction per spec.md §3).
    pub fn append_history(&mut self, agent_id: &str, role: &str, content: serde_json::Value) {
        if agent_id.is_empty() {
            return;
        }
        let history = self.agent_conversations.entry(agent_id.to_string()).or_insert_with(Vec::new);
        history.push(HistoryEntry { role: role.to_string(), content });
        let max_depth = if self.max_history_depth == 0 { 20 } else { self.max_history_depth };
        if history.len() > max_depth {
            let drop = history.len() - max_depth;
            history.drain(0..drop);
        }
    }

    pub fn next_message_id(&mut self) -> String {
        self.message_counter += 1;
        format!("msg-{}-{}", self.tick_index, self.message_counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_evicts_beyond_max_depth() {
        let mut session = Session::new("s-1");
        session.max_history_depth = 2;
        for i in 0..5 {
            session.append_history("a", "user", serde_json::json!({ "n": i }));
        }
        let history = &session.agent_conversations["a"];
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content["n"], 3);
        assert_eq!(history[1].content["n"], 4);
    }

    #[test]
    fn message_ids_embed_tick_and_counter() {
        let mut session = Session::new("s-1");
        session.tick_index = 3;
        assert_eq!(session.next_message_id(), "msg-3-1");
        assert_eq!(session.next_message_id(), "msg-3-2");
    }
}
