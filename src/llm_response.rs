//! LLM Response Generator (C7): role-prompted completion, history assembly,
//! and cost computation.
//!
//! Role prompts and the model-pricing table are `lazy_static` maps, matching
//! the teacher's `lazy_static` usage for static tables (e.g.
//! `SHARED_HTTP_CLIENT` in the teacher's common client module) and honoring
//! spec.md §9's "keep the cost table as data" note.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::llm_client::{CompletionRequest, LlmClient, RequestMessage};
use crate::message_bus::canonicalize;
use crate::session::Session;

lazy_static! {
    /// `role -> system prompt`. Unknown roles fall back to `"worker"`.
    static ref ROLE_PROMPTS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert(
            "orchestrator",
            "You are the orchestrator. Delegate work to the other agents, then \
             synthesize their replies into one final answer for the user.",
        );
        m.insert(
            "foreman",
            "You are the foreman. Break down the task at hand and keep the \
             other agents on track.",
        );
        m.insert(
            "worker",
            "You are a worker agent. Complete the task you were given and \
             report back concisely.",
        );
        m.insert(
            "reviewer",
            "You are a reviewer. Evaluate the work you are shown and report \
             concrete issues or approval.",
        );
        m.insert(
            "fixer",
            "You are a fixer. Given a described problem, propose and apply a \
             concrete fix.",
        );
        m
    };

    /// `model_id -> (prompt_usd_per_million, completion_usd_per_million)`.
    /// Unknown models contribute zero cost.
    static ref MODEL_PRICING: HashMap<&'static str, (f64, f64)> = {
        let mut m = HashMap::new();
        m.insert("gpt-4o", (2.50, 10.00));
        m.insert("gpt-4o-mini", (0.15, 0.60));
        m.insert("claude-3-5-sonnet", (3.00, 15.00));
        m.insert("claude-3-5-haiku", (0.80, 4.00));
        m
    };
}

/// Look up the system prompt for `role`, falling back to `"worker"` for
/// anything unrecognized (spec.md §4.7.1).
pub fn role_prompt(role: &str) -> &'static str {
    ROLE_PROMPTS.get(role).copied().unwrap_or(ROLE_PROMPTS["worker"])
}

/// Compute cost in USD from token usage and a model id, per the static
/// pricing table. Unknown models contribute zero (spec.md §4.7.4).
pub fn compute_cost(model_id: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let (prompt_rate, completion_rate) = MODEL_PRICING.get(model_id).copied().unwrap_or((0.0, 0.0));
    (prompt_tokens as f64 / 1_000_000.0) * prompt_rate + (completion_tokens as f64 / 1_000_000.0) * completion_rate
}

/// Serialize arbitrary structured content to the stable canonical text form
/// used both for request bodies and for the stub-reply hash (spec.md
/// §4.7.2, §9).
pub fn stable_content_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        other => canonicalize(other),
    }
}

/// Assemble a completion request for `agent_id`: the role's system prompt,
/// then its conversation history replayed in order, then a trailing "user"
/// message carrying the triggering content.
pub fn assemble_request(session: &Session, agent_id: &str, role: Option<crate::session::AgentRole>, incoming_content: &serde_json::Value) -> CompletionRequest {
    let role_str = role.map(|r| r.as_str()).unwrap_or("worker");
    let mut messages = vec![RequestMessage { role: "system".to_string(), content: role_prompt(role_str).to_string() }];

    if let Some(history) = session.agent_conversations.get(agent_id) {
        for entry in history {
            messages.push(RequestMessage { role: entry.role.clone(), content: stable_content_text(&entry.content) });
        }
    }

    messages.push(RequestMessage { role: "user".to_string(), content: stable_content_text(incoming_content) });

    CompletionRequest {
        model: session.model_for(agent_id),
        messages,
        temperature: session.default_temperature,
    }
}

/// Run one completion for `agent_id` and compute its USD cost. The caller
/// (the tick engine) is responsible for adding the returned cost to
/// `session.cost_usd` and for deciding whether to fall back to a stub on
/// `Err`.
pub async fn generate(
    client: &dyn LlmClient,
    session: &Session,
    agent_id: &str,
    role: Option<crate::session::AgentRole>,
    incoming_content: &serde_json::Value,
) -> Result<(String, f64), String> {
    let request = assemble_request(session, agent_id, role, incoming_content);
    let model = request.model.clone();
    let response = client.complete(request).await?;
    let cost = compute_cost(&model, response.usage.prompt_tokens, response.usage.completion_tokens);
    Ok((response.content, cost))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::DryRunLlmClient;
    use crate::session::{AgentRole, HistoryEntry};

    #[test]
    fn unknown_role_falls_back_to_worker() {
        assert_eq!(role_prompt("ghost"), role_prompt("worker"));
    }

    #[test]
    fn unknown_model_costs_nothing() {
        assert_eq!(compute_cost("unknown-model", 1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn known_model_cost_matches_pricing_table() {
        let cost = compute_cost("gpt-4o-mini", 1_000_000, 1_000_000);
        assert!((cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn history_is_replayed_in_order_with_trailing_user_message() {
        let mut session = Session::new("s-1");
        session
            .agent_conversations
            .insert("a".to_string(), vec![HistoryEntry { role: "user".to_string(), content: serde_json::json!("first") }]);
        let request = assemble_request(&session, "a", Some(AgentRole::Worker), &serde_json::json!("second"));
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].content, "first");
        assert_eq!(request.messages[2].content, "second");
    }

    #[tokio::test]
    async fn generate_reports_zero_cost_for_dry_run() {
        let client = DryRunLlmClient;
        let session = Session::new("s-1");
        let (text, cost) = generate(&client, &session, "a", Some(AgentRole::Worker), &serde_json::json!("hi")).await.unwrap();
        assert_eq!(cost, 0.0);
        assert!(!text.is_empty());
    }
}
