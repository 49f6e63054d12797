#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **agentmux-types** – Shared data model for the agentmux orchestration runtime.
//!
//! This crate is dependency-light and sits at the bottom of the crate graph:
//! every other `agentmux-*` crate depends on it, so it must never pull in
//! anything that would create a cycle. It defines the canonical `Signal`
//! envelope, the agent/session/task records, the war-room memo, the
//! versioned context section, the token budget slots, and the declarative
//! guideline shape described in spec §3.

pub mod agent;
pub mod budget;
pub mod context;
pub mod guideline;
pub mod log;
pub mod signal;
pub mod warroom;

pub use agent::{
    AgentBackendKind, AgentCapabilities, AgentConfig, AgentConfigError, AgentConfigLoadError,
    AgentPerformance, AgentRole, AgentSession, AgentTask, SessionStatus, TaskStatus, TokenLimits,
    TokenUsage,
};
pub use budget::{Complexity, TokenBudget};
pub use context::{estimate_tokens, ConflictResolution, ContextConflict, ContextSection, ContextVersion};
pub use guideline::{
    DecisionPoint, Execution, ExecutionStatus, Guideline, GuidelineCategory, GuidelineError,
    GuidelineLoadError, GuidelineMetrics, Protocol, ProtocolStep,
};
pub use log::{LogEntry, LogLevel};
pub use signal::{Provenance, Signal, SignalCatalog, SignalError, SignalKind, SignalPriority, SignalState};
pub use warroom::{WarRoomItem, WarRoomSection, WarRoomSnapshot};
