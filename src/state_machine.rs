//! State Machine (C3): a static table of legal phase transitions plus
//! per-phase exit criteria. Grounded on
//! `original_source/orchestration/coordinator/state_machine.py` for the
//! `TransitionError`/`ExitCriteriaNotMet` message shapes (now in
//! [`crate::errors`]) and on spec.md §4.3 for the transition table itself.

use crate::errors::{ExitCriteriaNotMet, PhaseTransitionError, TransitionError};
use crate::session::{Phase, Session};

/// The allowed-transitions table. Transitions to `Failed` bypass exit
/// criteria entirely; terminal phases admit nothing.
fn allowed_targets(phase: Phase) -> &'static [Phase] {
    use Phase::*;
    match phase {
        Questionnaire => &[BuildSpec, Failed],
        BuildSpec => &[Idea, Failed],
        Idea => &[PlanReview, Failed],
        PlanReview => &[Execution, Idea, Failed],
        Execution => &[Clarification, Verification, Complete, Failed],
        Clarification => &[Execution, Failed],
        Verification => &[Complete, Execution, Failed],
        Complete | Failed => &[],
    }
}

/// Exit-criteria predicate for `phase`: what must be true about `session`
/// before it may leave `phase` for anything other than `Failed`.
fn exit_criteria_met(phase: Phase, session: &Session) -> Result<(), &'static str> {
    match phase {
        Phase::Questionnaire => {
            // At least one questionnaire answer recorded.
            if session.pre_simulation_artifacts.get("intent_profile").is_some() {
                Ok(())
            } else {
                Err("at least one questionnaire answer recorded")
            }
        }
        Phase::BuildSpec => {
            if session.pre_simulation_artifacts.get("build_spec").is_some() {
                Ok(())
            } else {
                Err("build spec populated")
            }
        }
        Phase::Idea => {
            if session.pre_simulation_artifacts.get("concept").is_some() {
                Ok(())
            } else {
                Err("concept populated")
            }
        }
        Phase::PlanReview => {
            if session.pre_simulation_artifacts.get("task_graph").is_some() {
                Ok(())
            } else {
                Err("task graph populated")
            }
        }
        Phase::Execution | Phase::Clarification | Phase::Verification | Phase::Complete | Phase::Failed => Ok(()),
    }
}

/// Attempt `session.phase -> to_phase`. On success mutates `session.phase`
/// in place. Invalid transitions fail with `PhaseTransitionError::Transition`;
/// unmet exit criteria fail with `PhaseTransitionError::ExitCriteria` — two
/// distinct error kinds, not one reason string (spec.md §4.3, §7).
pub fn transition(session: &mut Session, to_phase: Phase) -> Result<(), PhaseTransitionError> {
    let from_phase = session.phase;

    if from_phase.is_terminal() {
        return Err(PhaseTransitionError::Transition(TransitionError {
            from_phase,
            to_phase,
            reason: "phase is terminal".to_string(),
        }));
    }

    if !allowed_targets(from_phase).contains(&to_phase) {
        return Err(PhaseTransitionError::Transition(TransitionError {
            from_phase,
            to_phase,
            reason: "transition not in allowed table".to_string(),
        }));
    }

    if to_phase != Phase::Failed {
        if let Err(criteria) = exit_criteria_met(from_phase, session) {
            return Err(PhaseTransitionError::ExitCriteria(ExitCriteriaNotMet {
                phase: from_phase,
                criteria: criteria.to_string(),
            }));
        }
    }

    session.phase = to_phase;
    Ok(())
}

/// Check exit criteria for the current phase without transitioning.
pub fn check_exit_criteria(session: &Session) -> Result<(), ExitCriteriaNotMet> {
    exit_criteria_met(session.phase, session).map_err(|criteria| ExitCriteriaNotMet {
        phase: session.phase,
        criteria: criteria.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases_admit_no_transitions() {
        let mut session = Session::new("s-1");
        session.phase = Phase::Complete;
        let err = transition(&mut session, Phase::Execution).unwrap_err();
        match err {
            PhaseTransitionError::Transition(e) => assert_eq!(e.from_phase, Phase::Complete),
            PhaseTransitionError::ExitCriteria(_) => panic!("expected TransitionError, got ExitCriteriaNotMet"),
        }
    }

    #[test]
    fn failed_bypasses_exit_criteria() {
        let mut session = Session::new("s-1");
        session.phase = Phase::Questionnaire;
        assert!(transition(&mut session, Phase::Failed).is_ok());
    }

    #[test]
    fn unmet_exit_criteria_blocks_forward_transition() {
        let mut session = Session::new("s-1");
        session.phase = Phase::Questionnaire;
        let err = transition(&mut session, Phase::BuildSpec).unwrap_err();
        match err {
            PhaseTransitionError::ExitCriteria(e) => assert!(e.criteria.contains("questionnaire")),
            PhaseTransitionError::Transition(_) => panic!("expected ExitCriteriaNotMet, got TransitionError"),
        }
    }

    #[test]
    fn plan_review_may_reject_back_to_idea() {
        let mut session = Session::new("s-1");
        session.phase = Phase::PlanReview;
        session.pre_simulation_artifacts = serde_json::json!({"task_graph": {}});
        assert!(transition(&mut session, Phase::Idea).is_ok());
    }
}
