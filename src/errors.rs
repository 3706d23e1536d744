//! Crate-wide error types.
//!
//! Each variant family here corresponds to one of the error kinds the core
//! distinguishes: a bad request (`ValidationError`), a phase-rule violation
//! (`TransitionError` / `ExitCriteriaNotMet`), a guardrail breach, a missing
//! remote connection, or a stale dispatch. `EventLogWriteFailure` and
//! `LlmFailure` are recovered locally and never surface from `advance_tick`;
//! they exist here only so call sites that choose to inspect them can.

use std::error::Error;
use std::fmt;

use crate::session::Phase;

/// Bad input: an empty id, a duplicate agent, an unknown target, a graph
/// edge referring to a non-member of the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for ValidationError {}

/// Raised when an invalid phase transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub reason: String,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cannot transition from {} to {}: {}",
            self.from_phase, self.to_phase, self.reason
        )
    }
}

impl Error for TransitionError {}

/// Raised when exit criteria for the current phase are not satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitCriteriaNotMet {
    pub phase: Phase,
    pub criteria: String,
}

impl fmt::Display for ExitCriteriaNotMet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exit criteria not met for {}: {}", self.phase, self.criteria)
    }
}

impl Error for ExitCriteriaNotMet {}

/// Either failure `state_machine::transition` can produce: an invalid
/// transition (not in the allowed-targets table, or the phase is terminal)
/// versus unmet exit criteria for the current phase. Kept as two distinct
/// variants rather than folded into one string reason, matching spec.md
/// §4.3/§7's "Invalid transitions fail with a structured `TransitionError`;
/// unmet exit criteria fail with `ExitCriteriaNotMet`".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransitionError {
    Transition(TransitionError),
    ExitCriteria(ExitCriteriaNotMet),
}

impl fmt::Display for PhaseTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseTransitionError::Transition(e) => write!(f, "{}", e),
            PhaseTransitionError::ExitCriteria(e) => write!(f, "{}", e),
        }
    }
}

impl Error for PhaseTransitionError {}

/// Cost cap exceeded or rate-limit interval not yet elapsed. Never mutates
/// session state; the caller maps this to a 429-equivalent response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailBreach {
    CostExceeded { cost_usd: f64, max_cost_usd: f64 },
    RateLimited { elapsed_ms: i64, required_ms: i64 },
}

impl fmt::Display for GuardrailBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardrailBreach::CostExceeded { .. } => write!(f, "Cost budget exceeded"),
            GuardrailBreach::RateLimited { .. } => write!(f, "Rate limit"),
        }
    }
}

impl Error for GuardrailBreach {}

/// A remote dispatch was attempted against an agent with no live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentNotConnected(pub String);

impl fmt::Display for AgentNotConnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Agent not connected: {}", self.0)
    }
}

impl Error for AgentNotConnected {}

/// A pending dispatch exceeded its time-to-live. Recovered locally by the
/// tick engine: it clears the dispatch, emits `AGENT_ERROR`, and synthesizes
/// a delivered reply carrying an error marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTimeout {
    pub message_id: String,
    pub agent_id: String,
}

impl fmt::Display for DispatchTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dispatch {} to agent {} timed out",
            self.message_id, self.agent_id
        )
    }
}

impl Error for DispatchTimeout {}

/// An LLM provider call failed. Recovered locally by falling back to the
/// deterministic stub reply; the tick engine emits `LLM_FAILURE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmFailure(pub String);

impl fmt::Display for LlmFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LLM call failed: {}", self.0)
    }
}

impl Error for LlmFailure {}

/// Event log write failed (disk/IO). Logged as a warning at the call site
/// and never propagated into tick logic; this type exists for completeness
/// of the error taxonomy, not as something `advance_tick` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogWriteFailure(pub String);

impl fmt::Display for EventLogWriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event log write failed: {}", self.0)
    }
}

impl Error for EventLogWriteFailure {}

/// A malformed remote duplex frame. Non-structural malformations are
/// ignored; fatally malformed frames close the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError(pub String);

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol error: {}", self.0)
    }
}

impl Error for ProtocolError {}

/// Unified failure type for operations that can fail for more than one
/// reason (the Simulation Controller's public surface). Mirrors how
/// `Agent::send` in the teacher boxes a single `OrchestrationError` at its
/// call boundary, generalized to this crate's wider error taxonomy.
#[derive(Debug, Clone)]
pub enum ControllerError {
    Validation(ValidationError),
    Transition(TransitionError),
    ExitCriteria(ExitCriteriaNotMet),
    Guardrail(GuardrailBreach),
    NotConnected(AgentNotConnected),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::Validation(e) => write!(f, "{}", e),
            ControllerError::Transition(e) => write!(f, "{}", e),
            ControllerError::ExitCriteria(e) => write!(f, "{}", e),
            ControllerError::Guardrail(e) => write!(f, "{}", e),
            ControllerError::NotConnected(e) => write!(f, "{}", e),
        }
    }
}

impl Error for ControllerError {}

impl From<ValidationError> for ControllerError {
    fn from(e: ValidationError) -> Self {
        ControllerError::Validation(e)
    }
}

impl From<TransitionError> for ControllerError {
    fn from(e: TransitionError) -> Self {
        ControllerError::Transition(e)
    }
}

impl From<ExitCriteriaNotMet> for ControllerError {
    fn from(e: ExitCriteriaNotMet) -> Self {
        ControllerError::ExitCriteria(e)
    }
}

impl From<PhaseTransitionError> for ControllerError {
    fn from(e: PhaseTransitionError) -> Self {
        match e {
            PhaseTransitionError::Transition(e) => ControllerError::Transition(e),
            PhaseTransitionError::ExitCriteria(e) => ControllerError::ExitCriteria(e),
        }
    }
}

impl From<GuardrailBreach> for ControllerError {
    fn from(e: GuardrailBreach) -> Self {
        ControllerError::Guardrail(e)
    }
}

impl From<AgentNotConnected> for ControllerError {
    fn from(e: AgentNotConnected) -> Self {
        ControllerError::NotConnected(e)
    }
}
