//! Tick Engine (C8) — the heart of the system.
//!
//! Grounded almost line-for-line in control flow on
//! `original_source/.../coordinator/tick_engine.py`'s `advance_tick`,
//! `_should_delegate`, `_queue_delegation_messages`, `_finalize_delegation`,
//! and `generate_stub_response`. Guardrails (spec.md §4.8 Step 0) are
//! enforced by [`crate::controller::SimulationController`], not here —
//! `advance_tick` assumes the caller has already checked them and holds
//! exclusive access to `session` for the duration of the call.

use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;
use tokio::time::Duration;

use crate::connection_manager::{DispatchOutcome, RemoteConnectionManager};
use crate::event::{Event, EventType};
use crate::event_log::EventLog;
use crate::llm_client::LlmClient;
use crate::llm_response;
use crate::message_bus::{self, MessageContent};
use crate::session::{AgentType, Session, TickStatus};

/// Summary of one `advance_tick` call, per spec.md §4.8 Step 9.
#[derive(Debug, Clone, Default)]
pub struct TickResult {
    pub old_tick: i64,
    pub new_tick: i64,
    pub messages_delivered: usize,
    pub messages_sent: usize,
    pub messages_blocked: usize,
}

/// First 10 hex chars of SHA-256 over the canonical-JSON form of `content`,
/// used for the deterministic stub reply (spec.md §4.8 Step 6, §9).
pub fn stub_hash(content: &MessageContent) -> String {
    let canonical = content.canonical_json();
    let digest = Sha256::digest(canonical.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..10].to_string()
}

fn stub_text(recipient: &str, sender: &str, tick: i64, hash10: &str) -> String {
    format!("[STUB] {} -> {} @ tick {} ({})", recipient, sender, tick, hash10)
}

/// Coordinates message delivery, LLM/remote-agent replies, and per-tick
/// bookkeeping for every session sharing this engine. One `TickEngine`
/// instance is shared across sessions; callers serialize per-session access
/// (e.g. via [`crate::session::store::SessionStore`]'s per-session lock).
pub struct TickEngine {
    event_log: Arc<EventLog>,
    connections: Arc<RemoteConnectionManager>,
    llm: Arc<dyn LlmClient>,
    dispatch_timeout: Duration,
    /// `session_id -> message_id -> receiver` for dispatches this engine
    /// itself sent in a prior tick's Step 6, drained in a later tick's
    /// Step 3. Not part of `Session` because `oneshot::Receiver` isn't
    /// `Serialize` — spec.md §9's note that the queue (and, by the same
    /// logic, in-flight dispatch handles) should be owned by the execution
    /// path rather than the persisted aggregate.
    pending_receivers: DashMap<String, DashMap<String, oneshot::Receiver<DispatchOutcome>>>,
}

impl TickEngine {
    pub fn new(event_log: Arc<EventLog>, connections: Arc<RemoteConnectionManager>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            event_log,
            connections,
            llm,
            dispatch_timeout: Duration::from_secs(300),
            pending_receivers: DashMap::new(),
        }
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Drop all tracked dispatch receivers for `session_id`. Used by
    /// simulation reset, alongside cancelling the connection manager's own
    /// pending dispatches for that session.
    pub fn clear_session_dispatches(&self, session_id: &str) {
        self.pending_receivers.remove(session_id);
    }

    fn emit(&self, session: &Session, event_type: EventType, message: impl Into<String>, metadata: serde_json::Value) {
        self.event_log.append_best_effort(
            Event::new(event_type, session.session_id.clone(), message)
                .with_phase(session.phase.to_string())
                .with_metadata(metadata),
        );
    }

    /// Perform one tick. Mutates `session` in place and returns a summary.
    pub async fn advance_tick(&self, session: &mut Session) -> TickResult {
        // Step 1 — conceptually "reset the per-tick event buffer"; this
        // implementation emits events directly to the log as they occur, so
        // there is no in-memory buffer to reset. Counters below play that role.
        let mut sent_this_tick = 0usize;
        let mut blocked_this_tick = 0usize;

        // Step 2 — increment the tick counter.
        let old_tick = session.tick_index;
        let new_tick = old_tick + 1;
        session.tick_index = new_tick;
        session.last_tick_timestamp = Some(chrono::Utc::now());

        // Step 3 — integrate pending remote dispatches: drain resolved
        // receivers (real responses or just-expired timeouts) and
        // synthesize the matching reply.
        self.integrate_remote_dispatches(session, new_tick).await;

        // Step 4 — choose one message to process: first undelivered,
        // unblocked message whose sender hasn't already acted this tick.
        let chosen_index = session
            .message_queue
            .iter()
            .position(|m| !m.is_delivered && !m.is_blocked);

        let Some(index) = chosen_index else {
            self.emit(
                session,
                EventType::TickAdvanced,
                format!("Tick advanced: {} -> {}", old_tick, new_tick),
                serde_json::json!({
                    "old_tick_index": old_tick,
                    "new_tick_index": new_tick,
                    "messages_delivered": 0,
                    "messages_sent": sent_this_tick,
                    "messages_blocked": blocked_this_tick,
                }),
            );
            return TickResult { old_tick, new_tick, messages_delivered: 0, messages_sent: sent_this_tick, messages_blocked: blocked_this_tick };
        };

        // Step 5 — deliver.
        let (message_id, from_agent, to_agent, content) = {
            let message = &mut session.message_queue[index];
            message_bus::deliver(message, new_tick);
            (message.message_id.clone(), message.from_agent.clone(), message.to_agent.clone(), message.content.clone())
        };
        session.append_history(&to_agent, "user", serde_json::to_value(&content).unwrap_or(serde_json::Value::Null));

        // Step 6 — choose a response strategy.
        self.respond(session, &message_id, &from_agent, &to_agent, &content, new_tick, &mut sent_this_tick, &mut blocked_this_tick).await;

        // Step 7 — delegation completion.
        self.maybe_finalize_delegation(session, &from_agent, &to_agent, new_tick, &mut sent_this_tick).await;

        // Step 8 — emit TICK_ADVANCED.
        self.emit(
            session,
            EventType::TickAdvanced,
            format!("Tick advanced: {} -> {}", old_tick, new_tick),
            serde_json::json!({
                "old_tick_index": old_tick,
                "new_tick_index": new_tick,
                "messages_delivered": 1,
                "messages_sent": sent_this_tick,
                "messages_blocked": blocked_this_tick,
            }),
        );

        TickResult { old_tick, new_tick, messages_delivered: 1, messages_sent: sent_this_tick, messages_blocked: blocked_this_tick }
    }

    async fn integrate_remote_dispatches(&self, session: &mut Session, tick: i64) {
        let session_id = session.session_id.clone();

        // Sweep dispatches older than the timeout across the whole manager,
        // then only act on the ones that belong to this session and that
        // this engine is tracking a receiver for.
        let stale_ids = self.connections.stale_dispatches(self.dispatch_timeout);
        for message_id in stale_ids {
            let tracked = self
                .pending_receivers
                .get(&session_id)
                .map(|m| m.contains_key(&message_id))
                .unwrap_or(false);
            if tracked {
                self.connections.take_stale(&message_id).await;
            }
        }

        let Some(receivers) = self.pending_receivers.get(&session_id) else { return };
        let resolved_ids: Vec<String> = {
            let mut ids = Vec::new();
            for mut entry in receivers.iter_mut() {
                if entry.value_mut().try_recv().is_ok() {
                    ids.push(entry.key().clone());
                }
            }
            ids
        };
        drop(receivers);

        for message_id in resolved_ids {
            let Some((_, mut receiver)) = self
                .pending_receivers
                .get(&session_id)
                .and_then(|m| m.remove(&message_id))
            else {
                continue;
            };
            let Ok(outcome) = receiver.try_recv() else { continue };

            // Find the original dispatched message to recover from/to agents.
            let Some(original) = session.message_queue.iter().find(|m| m.message_id == message_id) else { continue };
            let dispatched_to = original.to_agent.clone();
            let dispatched_from = original.from_agent.clone();

            if let Some(error) = outcome.error {
                self.emit(
                    session,
                    EventType::AgentError,
                    format!("Agent {} error on dispatch {}: {}", dispatched_to, message_id, error),
                    serde_json::json!({"agent_id": dispatched_to, "message_id": message_id, "error": error}),
                );
                let reply_content = MessageContent::text(format!("ERROR: {}", error));
                let (_, msg) = message_bus::send(session, &self.event_log, &dispatched_to, &dispatched_from, reply_content, true);
                if let Some(mut msg) = msg {
                    message_bus::deliver(&mut msg, tick);
                    if let Some(last) = session.message_queue.last_mut() {
                        *last = msg;
                    }
                }
            } else {
                self.emit(
                    session,
                    EventType::AgentResponse,
                    format!("Agent {} responded to dispatch {}", dispatched_to, message_id),
                    serde_json::json!({"agent_id": dispatched_to, "message_id": message_id}),
                );
                let text = llm_response::stable_content_text(&outcome.content);
                let reply_content = MessageContent::text(text);
                let (_, msg) = message_bus::send(session, &self.event_log, &dispatched_to, &dispatched_from, reply_content, true);
                if let Some(mut msg) = msg {
                    message_bus::deliver(&mut msg, tick);
                    if let Some(last) = session.message_queue.last_mut() {
                        *last = msg;
                    }
                }
            }
        }
    }

    async fn respond(
        &self,
        session: &mut Session,
        message_id: &str,
        from_agent: &str,
        to_agent: &str,
        content: &MessageContent,
        tick: i64,
        sent_this_tick: &mut usize,
        blocked_this_tick: &mut usize,
    ) {
        // Delegation trigger: user -> orchestrator, expects a response, no
        // delegation already in flight, and at least one non-orchestrator
        // agent exists.
        if from_agent == "user"
            && session.is_orchestrator(to_agent)
            && content.expect_response
            && session.expected_responses.is_empty()
            && session.agents.iter().any(|a| a.role != Some(crate::session::AgentRole::Orchestrator))
        {
            self.queue_delegation_messages(session, to_agent, content, sent_this_tick, blocked_this_tick);
            return;
        }

        // Remote agent: dispatch and come back for the response in a later tick.
        if session.agent_type_of(to_agent) == Some(AgentType::Remote) && self.connections.is_connected(to_agent) {
            self.dispatch_to_remote(session, message_id, to_agent, content).await;
            return;
        }

        if !content.expect_response {
            return;
        }

        if session.use_real_llm {
            let role = session.role_of(to_agent);
            match llm_response::generate(self.llm.as_ref(), session, to_agent, role, &serde_json::to_value(content).unwrap_or(serde_json::Value::Null)).await {
                Ok((text, cost)) => {
                    session.cost_usd += cost;
                    self.emit(
                        session,
                        EventType::CostTracking,
                        format!("LLM cost for {}: ${:.6}", to_agent, cost),
                        serde_json::json!({"agent_id": to_agent, "cost_usd": cost, "total_cost_usd": session.cost_usd}),
                    );
                    let reply = MessageContent { text, is_stub: false, expect_response: false, ..Default::default() };
                    self.enqueue_reply(session, to_agent, from_agent, reply, message_id, tick, sent_this_tick, blocked_this_tick);
                    return;
                }
                Err(err) => {
                    self.emit(
                        session,
                        EventType::LlmFailure,
                        format!("LLM call failed for {}: {}", to_agent, err),
                        serde_json::json!({"agent_id": to_agent, "error": err}),
                    );
                }
            }
        }

        // LLM disabled, or real-LLM call failed: deterministic stub.
        let hash10 = stub_hash(content);
        let reply = MessageContent {
            text: stub_text(to_agent, from_agent, tick, &hash10),
            is_stub: true,
            stub_hash: Some(hash10),
            expect_response: false,
            ..Default::default()
        };
        self.enqueue_reply(session, to_agent, from_agent, reply, message_id, tick, sent_this_tick, blocked_this_tick);
    }

    /// Enqueue a reply generated in Step 6 (stub or real-LLM). Per the
    /// worked delegation scenario (spec.md §8 scenario 2), this reply is
    /// *not* delivered in the same tick it is created — it joins the queue
    /// like any other message and is picked up by a later tick's Step 4,
    /// preserving the one-message-per-tick pacing. This is distinct from
    /// the delegation *final answer* (§4.8 Step 7), which the spec is
    /// explicit is delivered immediately, and from remote-dispatch
    /// integration (§4.8 Step 3), likewise immediate.
    ///
    /// `triggering_message_id` is the id of the message this reply answers
    /// (the one `respond` was invoked for), not whatever happens to be last
    /// in the queue — in the delegation scenario those can differ once more
    /// than one delegation message is outstanding.
    fn enqueue_reply(
        &self,
        session: &mut Session,
        from_agent: &str,
        to_agent: &str,
        mut content: MessageContent,
        triggering_message_id: &str,
        _tick: i64,
        sent_this_tick: &mut usize,
        blocked_this_tick: &mut usize,
    ) {
        content.in_response_to = Some(triggering_message_id.to_string());
        session.append_history(from_agent, "assistant", serde_json::to_value(&content).unwrap_or(serde_json::Value::Null));
        let (ok, _msg) = message_bus::send(session, &self.event_log, from_agent, to_agent, content, true);
        if ok {
            *sent_this_tick += 1;
        } else {
            *blocked_this_tick += 1;
        }
    }

    fn queue_delegation_messages(
        &self,
        session: &mut Session,
        orchestrator: &str,
        _trigger: &MessageContent,
        sent_this_tick: &mut usize,
        blocked_this_tick: &mut usize,
    ) {
        let targets: Vec<String> = session
            .agents
            .iter()
            .filter(|a| a.role != Some(crate::session::AgentRole::Orchestrator))
            .map(|a| a.agent_id.clone())
            .collect();

        for target in &targets {
            let content = MessageContent::default().as_delegation();
            let (ok, _) = message_bus::send(session, &self.event_log, orchestrator, target, content, true);
            if ok {
                *sent_this_tick += 1;
            } else {
                *blocked_this_tick += 1;
            }
        }
        session.expected_responses = targets;
    }

    async fn maybe_finalize_delegation(
        &self,
        session: &mut Session,
        from_agent: &str,
        to_agent: &str,
        tick: i64,
        sent_this_tick: &mut usize,
    ) {
        if session.expected_responses.is_empty() || !session.is_orchestrator(to_agent) {
            return;
        }
        if let Some(pos) = session.expected_responses.iter().position(|id| id == from_agent) {
            session.expected_responses.remove(pos);
        } else {
            return;
        }

        if !session.expected_responses.is_empty() {
            return;
        }

        let final_text = if session.use_real_llm {
            let role = session.role_of(to_agent);
            let prompt = serde_json::json!({ "text": "Synthesize the final answer from the collected agent replies." });
            match llm_response::generate(self.llm.as_ref(), session, to_agent, role, &prompt).await {
                Ok((text, cost)) => {
                    session.cost_usd += cost;
                    self.emit(
                        session,
                        EventType::CostTracking,
                        format!("LLM cost for {} (final answer): ${:.6}", to_agent, cost),
                        serde_json::json!({"agent_id": to_agent, "cost_usd": cost, "total_cost_usd": session.cost_usd}),
                    );
                    text
                }
                Err(err) => {
                    self.emit(
                        session,
                        EventType::LlmFailure,
                        format!("LLM call failed for {} (final answer): {}", to_agent, err),
                        serde_json::json!({"agent_id": to_agent, "error": err}),
                    );
                    let hash10 = stub_hash(&MessageContent::default());
                    stub_text(to_agent, "user", tick, &hash10)
                }
            }
        } else {
            let hash10 = stub_hash(&MessageContent::default());
            stub_text(to_agent, "user", tick, &hash10)
        };

        let content = MessageContent { text: final_text.clone(), final_answer: true, ..Default::default() };
        session.append_history(to_agent, "assistant", serde_json::to_value(&content).unwrap_or(serde_json::Value::Null));
        let (ok, msg) = message_bus::send(session, &self.event_log, to_agent, "user", content, true);
        if ok {
            *sent_this_tick += 1;
            if let Some(mut msg) = msg {
                message_bus::deliver(&mut msg, tick);
                let len = session.message_queue.len();
                session.message_queue[len - 1] = msg;
            }
        }
        session.final_answer = Some(final_text);
        session.tick_status = TickStatus::Completed;
    }

    async fn dispatch_to_remote(&self, session: &mut Session, message_id: &str, to_agent: &str, content: &MessageContent) {
        let message_id = message_id.to_string();
        let payload = serde_json::to_value(content).unwrap_or(serde_json::Value::Null);
        match self
            .connections
            .dispatch(to_agent, message_id.clone(), payload.clone(), serde_json::json!({}), session.session_id.clone(), None)
            .await
        {
            Ok(receiver) => {
                self.pending_receivers.entry(session.session_id.clone()).or_insert_with(DashMap::new).insert(message_id.clone(), receiver);
                self.emit(
                    session,
                    EventType::TaskDispatched,
                    format!("Dispatched {} to remote agent {}", message_id, to_agent),
                    serde_json::json!({"agent_id": to_agent, "message_id": message_id, "preview": content.text.chars().take(100).collect::<String>()}),
                );
            }
            Err(err) => {
                self.emit(
                    session,
                    EventType::AgentError,
                    format!("Dispatch to {} failed: {}", to_agent, err),
                    serde_json::json!({"agent_id": to_agent, "message_id": message_id, "error": err.to_string()}),
                );
            }
        }
    }
}
