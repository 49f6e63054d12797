//! Guideline registry/dispatcher error kinds (spec §4.H, §7 error table).

use agentmux_types::GuidelineError as ValidationError;
use uuid::Uuid;

/// Errors raised by `GuidelineRegistry` operations.
#[derive(Debug, thiserror::Error)]
pub enum GuidelinesError {
    /// A `Guideline` failed field validation or dependents-graph
    /// consistency (spec §4.H `registerGuideline`/`unregisterGuideline`).
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// No guideline is registered under this id.
    #[error("unknown guideline {0}")]
    UnknownGuideline(String),
    /// No execution is tracked under this id.
    #[error("unknown execution {0}")]
    UnknownExecution(Uuid),
    /// `processSignal` found the guideline's trigger match, but one or
    /// more of its declared requirements is unmet.
    #[error("guideline {0} has unmet requirements: {1:?}")]
    RequirementsUnmet(String, Vec<String>),
    /// A status transition was requested that isn't reachable from the
    /// execution's current status (spec §4.H "pending → running →
    /// {completed | failed}").
    #[error("execution {execution_id} cannot transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Execution the transition was attempted on.
        execution_id: Uuid,
        /// Status the execution was actually in.
        from: agentmux_types::ExecutionStatus,
        /// Status that was requested.
        to: agentmux_types::ExecutionStatus,
    },
}
