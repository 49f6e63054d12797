//! Lifecycle Manager error kinds (spec §7 error table).

use agentmux_session::SessionHostError;
use agentmux_types::AgentConfigError;

/// Errors raised by `LifecycleManager` operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Selection scored every candidate at 0, or the registry is empty.
    #[error("no suitable agent for task type {0:?}")]
    NoSuitableAgent(agentmux_types::AgentRole),
    /// The dispatched task's response did not arrive within the deadline.
    #[error("agent {agent_id} did not respond to task {task_id} within the deadline")]
    AgentResponseTimeout {
        /// Agent the task was dispatched to.
        agent_id: String,
        /// Task that timed out.
        task_id: String,
    },
    /// A freshly spawned session never reached `idle` within the deadline.
    #[error("agent {0} did not become ready in time")]
    AgentNotReady(String),
    /// A registered `AgentConfig` failed validation.
    #[error(transparent)]
    ConfigurationInvalid(#[from] AgentConfigError),
    /// The Session Host reported an error.
    #[error(transparent)]
    Host(#[from] SessionHostError),
    /// No config is registered under this agent id.
    #[error("unknown agent {0}")]
    UnknownAgent(String),
}
