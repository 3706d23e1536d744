//! Session Coordinator (C10) — pre-simulation glue: questionnaire → build
//! spec → concept → plan phases. Deliberately thin, per spec.md §1 and §2
//! ("thin — mostly external glue"): the questionnaire/build-spec/concept/
//! plan-generation pipeline itself is an external collaborator, specified
//! only via the interface below. This module owns just the phase-transition
//! bookkeeping and the opaque-artifact storage spec.md §3 calls out.

use std::sync::Arc;

use crate::errors::ControllerError;
use crate::event::{phase_transition_event, Event, EventType};
use crate::event_log::EventLog;
use crate::session::{Phase, Session};
use crate::state_machine;

pub struct SessionCoordinator {
    event_log: Arc<EventLog>,
}

impl SessionCoordinator {
    pub fn new(event_log: Arc<EventLog>) -> Self {
        Self { event_log }
    }

    /// Emit `workspace_initialized`, the first event a session's log sees.
    pub fn initialize_workspace(&self, session: &Session) {
        self.event_log.append_best_effort(
            Event::new(EventType::WorkspaceInitialized, session.session_id.clone(), "Workspace initialized")
                .with_phase(session.phase.to_string()),
        );
    }

    /// Record the questionnaire's output (opaque to the core) and attempt
    /// `QUESTIONNAIRE -> BUILD_SPEC`.
    pub fn record_intent_profile(&self, session: &mut Session, intent_profile: serde_json::Value) -> Result<(), ControllerError> {
        merge_artifact(session, "intent_profile", intent_profile.clone());
        self.event_log.append_best_effort(
            Event::new(EventType::IntentProfileCreated, session.session_id.clone(), "Intent profile created")
                .with_phase(session.phase.to_string())
                .with_metadata(intent_profile),
        );
        self.transition(session, Phase::BuildSpec)
    }

    /// Record the generated build spec and attempt `BUILD_SPEC -> IDEA`.
    pub fn record_build_spec(&self, session: &mut Session, build_spec: serde_json::Value) -> Result<(), ControllerError> {
        merge_artifact(session, "build_spec", build_spec.clone());
        self.event_log.append_best_effort(
            Event::new(EventType::BuildSpecCreated, session.session_id.clone(), "Build spec created")
                .with_phase(session.phase.to_string())
                .with_metadata(build_spec),
        );
        self.transition(session, Phase::Idea)
    }

    /// Record the generated concept and attempt `IDEA -> PLAN_REVIEW`.
    pub fn record_concept(&self, session: &mut Session, concept: serde_json::Value) -> Result<(), ControllerError> {
        merge_artifact(session, "concept", concept.clone());
        self.event_log.append_best_effort(
            Event::new(EventType::ConceptCreated, session.session_id.clone(), "Concept created")
                .with_phase(session.phase.to_string())
                .with_metadata(concept),
        );
        self.transition(session, Phase::PlanReview)
    }

    /// Record the generated task graph/plan. Does not itself transition —
    /// the plan must still be approved or rejected.
    pub fn record_task_graph(&self, session: &mut Session, task_graph: serde_json::Value) {
        merge_artifact(session, "task_graph", task_graph.clone());
        self.event_log.append_best_effort(
            Event::new(EventType::TaskGraphCreated, session.session_id.clone(), "Task graph created")
                .with_phase(session.phase.to_string())
                .with_metadata(task_graph),
        );
    }

    /// Approve the reviewed plan: `PLAN_REVIEW -> EXECUTION`.
    pub fn approve_plan(&self, session: &mut Session) -> Result<(), ControllerError> {
        self.event_log.append_best_effort(
            Event::new(EventType::PlanApproved, session.session_id.clone(), "Plan approved").with_phase(session.phase.to_string()),
        );
        self.transition(session, Phase::Execution)
    }

    /// Reject the reviewed plan: `PLAN_REVIEW -> IDEA` (regenerate).
    pub fn reject_plan(&self, session: &mut Session) -> Result<(), ControllerError> {
        self.event_log.append_best_effort(
            Event::new(EventType::PlanRejected, session.session_id.clone(), "Plan rejected, regenerating").with_phase(session.phase.to_string()),
        );
        self.transition(session, Phase::Idea)
    }

    /// Always fails the session, regardless of current phase: writes
    /// `SESSION_FAILED` and forces `Phase::Failed`, bypassing exit-criteria
    /// checks (spec.md §9 open question #1).
    pub fn fail_session(&self, session: &mut Session, reason: impl Into<String>) {
        let reason = reason.into();
        session.phase = Phase::Failed;
        self.event_log.append_best_effort(
            Event::new(EventType::SessionFailed, session.session_id.clone(), format!("Session failed: {}", reason))
                .with_phase(session.phase.to_string())
                .with_metadata(serde_json::json!({"reason": reason})),
        );
    }

    fn transition(&self, session: &mut Session, to: Phase) -> Result<(), ControllerError> {
        let from = session.phase;
        state_machine::transition(session, to)?;
        self.event_log.append_best_effort(phase_transition_event(session.session_id.clone(), from.to_string(), to.to_string(), None));
        Ok(())
    }
}

fn merge_artifact(session: &mut Session, key: &str, value: serde_json::Value) {
    if !session.pre_simulation_artifacts.is_object() {
        session.pre_simulation_artifacts = serde_json::json!({});
    }
    session.pre_simulation_artifacts[key] = value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_advances_phase_by_phase() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(EventLog::new(dir.path()));
        let coordinator = SessionCoordinator::new(log);
        let mut session = Session::new("s-1");

        coordinator.record_intent_profile(&mut session, serde_json::json!({"goal": "build a thing"})).unwrap();
        assert_eq!(session.phase, Phase::BuildSpec);

        coordinator.record_build_spec(&mut session, serde_json::json!({"spec": "..."})).unwrap();
        assert_eq!(session.phase, Phase::Idea);

        coordinator.record_concept(&mut session, serde_json::json!({"concept": "..."})).unwrap();
        assert_eq!(session.phase, Phase::PlanReview);

        coordinator.record_task_graph(&mut session, serde_json::json!({"tasks": []}));
        coordinator.approve_plan(&mut session).unwrap();
        assert_eq!(session.phase, Phase::Execution);
    }

    #[test]
    fn rejected_plan_goes_back_to_idea() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(EventLog::new(dir.path()));
        let coordinator = SessionCoordinator::new(log);
        let mut session = Session::new("s-1");
        session.phase = Phase::PlanReview;
        session.pre_simulation_artifacts = serde_json::json!({"task_graph": {}});

        coordinator.reject_plan(&mut session).unwrap();
        assert_eq!(session.phase, Phase::Idea);
    }

    #[test]
    fn fail_session_bypasses_exit_criteria_from_any_phase() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(EventLog::new(dir.path()));
        let coordinator = SessionCoordinator::new(log);
        let mut session = Session::new("s-1");
        coordinator.fail_session(&mut session, "verifier crashed");
        assert_eq!(session.phase, Phase::Failed);
    }
}
