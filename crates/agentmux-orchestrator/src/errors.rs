//! Orchestrator Core error kinds (spec §4.I, §7 error table).

/// Errors raised by `Orchestrator`/`AgentOrchestratorRuntime` operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Selection found no eligible agent for the dispatched task, or every
    /// parallel sub-task hit the same wall. Always produces an escalation
    /// record rather than an ordinary failed result (spec §4.I dispatch
    /// option (c), §7 `NoSuitableAgent`).
    #[error("no suitable agent for this signal")]
    NoSuitableAgent,
    /// `start()` was called on an orchestrator that is already running
    /// (tested property: "start when already started fails without side
    /// effect").
    #[error("orchestrator is already started")]
    AlreadyStarted,
    /// `enqueue` was called after `shutdown()` began draining the queue.
    #[error("orchestrator is shutting down, not accepting new signals")]
    ShuttingDown,
    /// Propagated from the Lifecycle Manager for a reason other than
    /// `NoSuitableAgent` (which is translated to `NoSuitableAgent` above).
    #[error(transparent)]
    Lifecycle(#[from] agentmux_lifecycle::LifecycleError),
}
