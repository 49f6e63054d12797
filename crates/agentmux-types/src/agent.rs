//! Declarative agent configuration and runtime session/task records
//! (spec §3: `AgentConfig`, `AgentSession`, `AgentTask`).
//!
//! Generalized from `toka-types::{AgentConfig, AgentMetadata, ...}`
//! (declarative, YAML-loadable) combined with
//! `toka-agent-runtime::{AgentExecutionState, RuntimeStats}` (runtime
//! records owned by the lifecycle manager).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Worker roles an agent can be selected to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Implements features / fixes.
    Coder,
    /// Reviews diffs and guideline protocol steps.
    Reviewer,
    /// Runs and triages test suites.
    Tester,
    /// Produces or updates planning/PRP documents.
    Planner,
    /// General-purpose fallback role.
    Generalist,
}

/// Backend kind behind an `AgentSession` (spec §4.D: two conforming
/// backends, chosen by the Session Host, not by the lifecycle manager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentBackendKind {
    /// Terminal-multiplexer-backed session (recommended for live UX).
    TerminalMultiplexer,
    /// Plain subprocess with piped stdio (fallback).
    Subprocess,
}

/// Per-period token ceilings for an agent (spec §3 `AgentConfig`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLimits {
    /// Daily token ceiling.
    pub daily: u64,
    /// Weekly token ceiling.
    pub weekly: u64,
    /// Monthly token ceiling.
    pub monthly: u64,
}

/// Capability bitmap-equivalent for an agent (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    /// Agent can invoke declared tools.
    pub tools_supported: bool,
    /// Agent accepts image inputs.
    pub images_supported: bool,
    /// Agent can itself spawn sub-agents.
    pub sub_agents_supported: bool,
    /// Agent can run tasks in parallel.
    pub parallel_supported: bool,
    /// Agent may execute code.
    pub code_execution: bool,
    /// Agent may access the filesystem.
    pub fs_access: bool,
    /// Agent may access the network.
    pub net_access: bool,
    /// Model context window, in tokens.
    pub context_window: u32,
    /// Model identifiers this agent can be configured with.
    pub supported_models: Vec<String>,
    /// File extensions/types this agent can process.
    pub supported_file_types: Vec<String>,
}

impl Default for AgentCapabilities {
    fn default() -> Self {
        Self {
            tools_supported: false,
            images_supported: false,
            sub_agents_supported: false,
            parallel_supported: false,
            code_execution: false,
            fs_access: false,
            net_access: false,
            context_window: 0,
            supported_models: Vec::new(),
            supported_file_types: Vec::new(),
        }
    }
}

/// Declarative agent configuration (spec §3). Loaded from an external
/// configuration file (out of scope here per spec §1) and handed to the
/// lifecycle manager already parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Stable identifier, used as the map key everywhere.
    pub id: String,
    /// Primary role this agent fills best (used in selection scoring).
    pub role: AgentRole,
    /// Backend kind to materialize sessions with.
    pub kind: AgentBackendKind,
    /// Every role this agent can handle (may include `role`).
    pub roles: HashSet<AgentRole>,
    /// Argv used to start the backing process.
    pub run_command: Vec<String>,
    /// Token budget ceilings.
    pub token_limits: TokenLimits,
    /// Declared capabilities.
    pub capabilities: AgentCapabilities,
}

/// Errors raised validating an `AgentConfig` (spec §7 `ConfigurationInvalid`).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AgentConfigError {
    /// `run_command` was empty — nothing to spawn.
    #[error("agent {0} has no run command")]
    MissingRunCommand(String),
    /// `id` was empty.
    #[error("agent config has an empty id")]
    EmptyId,
    /// `roles` did not include `role` (the declared best role).
    #[error("agent {0} declares best role {1:?} but does not list it among its roles")]
    BestRoleNotInRoles(String, AgentRole),
}

impl AgentConfig {
    /// Validate required invariants; called by the lifecycle manager before
    /// registering a config (spec §4.E item 1, §7 `ConfigurationInvalid`).
    pub fn validate(&self) -> Result<(), AgentConfigError> {
        if self.id.is_empty() {
            return Err(AgentConfigError::EmptyId);
        }
        if self.run_command.is_empty() {
            return Err(AgentConfigError::MissingRunCommand(self.id.clone()));
        }
        if !self.roles.contains(&self.role) {
            return Err(AgentConfigError::BestRoleNotInRoles(
                self.id.clone(),
                self.role,
            ));
        }
        Ok(())
    }

    /// Parse an `AgentConfig` from a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    /// Parse an `AgentConfig` from a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Load and parse an `AgentConfig` from `path` (SPEC_FULL §10.2),
    /// choosing JSON or YAML by extension (`.json` is JSON, anything else
    /// is YAML).
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, AgentConfigLoadError> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path)
            .map_err(|source| AgentConfigLoadError::Io { path: path.to_path_buf(), source })?;
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            Ok(Self::from_json_str(&body)?)
        } else {
            Ok(Self::from_yaml_str(&body)?)
        }
    }
}

/// Errors raised loading an `AgentConfig` from disk (SPEC_FULL §10.2).
#[derive(Debug, thiserror::Error)]
pub enum AgentConfigLoadError {
    /// The file could not be read.
    #[error("failed to read agent config at {path}: {source}")]
    Io {
        /// Path that was read.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file's content did not parse as YAML.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    /// The file's content did not parse as JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Runtime status of an `AgentSession` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session host is spawning the process.
    Starting,
    /// Session is up and has no assigned task.
    Idle,
    /// Session is executing a dispatched task.
    Busy,
    /// Session has failed a health check or otherwise errored.
    Error,
    /// Session process has exited.
    Offline,
}

/// Token usage accumulated by an `AgentSession`, or reported inline with a
/// single task response (spec §6 `tokenUsage?: {input, output, total, cost?}`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input/prompt tokens consumed.
    #[serde(default)]
    pub input: u64,
    /// Output/completion tokens consumed.
    #[serde(default)]
    pub output: u64,
    /// Total tokens consumed.
    pub total: u64,
    /// Estimated monetary cost, if the backend reports one.
    pub cost: Option<f64>,
    /// Last time this usage figure was updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Rolling performance metrics for an `AgentSession` (spec §3,
/// §4.E item 2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    /// Tasks completed by this session.
    pub tasks_completed: u64,
    /// Running average task duration, in milliseconds.
    pub avg_task_ms: f64,
    /// Running success rate in `[0.0, 1.0]`.
    pub success_rate: f64,
    /// Count of failed/errored task dispatches.
    pub error_count: u64,
}

impl AgentPerformance {
    /// Fold in the outcome of one task dispatch, updating the running
    /// average duration and success rate (spec §4.E item 2).
    pub fn record(&mut self, success: bool, duration_ms: u64) {
        let n = self.tasks_completed as f64;
        self.avg_task_ms = (self.avg_task_ms * n + duration_ms as f64) / (n + 1.0);
        let successes_before = self.success_rate * n;
        let successes_after = successes_before + if success { 1.0 } else { 0.0 };
        self.tasks_completed += 1;
        self.success_rate = successes_after / self.tasks_completed as f64;
        if !success {
            self.error_count += 1;
        }
    }
}

/// Runtime agent session record, owned by the Lifecycle Manager (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    /// Session identifier, assigned by the Session Host at creation.
    pub session_id: String,
    /// Owning agent's configuration id.
    pub agent_id: String,
    /// Current status.
    pub status: SessionStatus,
    /// Last time this session produced output or received a ping reply.
    pub last_activity: DateTime<Utc>,
    /// The task currently dispatched to this session, if any.
    pub current_task: Option<String>,
    /// Accumulated token usage.
    pub token_usage: TokenUsage,
    /// Rolling performance metrics.
    pub performance: AgentPerformance,
}

impl AgentSession {
    /// Construct a freshly-spawned session in the `Starting` state.
    pub fn new(session_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            status: SessionStatus::Starting,
            last_activity: Utc::now(),
            current_task: None,
            token_usage: TokenUsage::default(),
            performance: AgentPerformance::default(),
        }
    }

    /// Seconds since this session last showed activity.
    pub fn idle_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_activity).num_seconds().max(0)
    }
}

/// Status of an `AgentTask` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, not yet dispatched.
    Pending,
    /// Dispatched to a session, awaiting response.
    InProgress,
    /// Session returned a successful result.
    Completed,
    /// Session returned an error, or dispatch failed/timed out.
    Failed,
}

/// Unit of work dispatched to an agent session (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    /// Unique task identifier.
    pub id: String,
    /// Target role — used by the selection algorithm.
    pub task_type: AgentRole,
    /// Human-readable description, sent to the agent.
    pub description: String,
    /// Opaque structured payload.
    pub payload: Option<Value>,
    /// Scheduling priority (mirrors the triggering signal's priority).
    pub priority: u8,
    /// Current status.
    pub status: TaskStatus,
    /// When the task was dispatched.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Result payload on success.
    pub result: Option<Value>,
    /// Error message on failure.
    pub error: Option<String>,
    /// Token usage reported with the result, if any.
    pub token_usage: Option<TokenUsage>,
}

impl AgentTask {
    /// Construct a new pending task.
    pub fn new(
        id: impl Into<String>,
        task_type: AgentRole,
        description: impl Into<String>,
        payload: Option<Value>,
        priority: u8,
    ) -> Self {
        Self {
            id: id.into(),
            task_type,
            description: description.into(),
            payload,
            priority,
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            token_usage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(role: AgentRole, roles: &[AgentRole]) -> AgentConfig {
        AgentConfig {
            id: "a1".into(),
            role,
            kind: AgentBackendKind::Subprocess,
            roles: roles.iter().copied().collect(),
            run_command: vec!["agent-bin".into()],
            token_limits: TokenLimits { daily: 10_000, weekly: 50_000, monthly: 150_000 },
            capabilities: AgentCapabilities::default(),
        }
    }

    #[test]
    fn validate_rejects_best_role_not_in_roles() {
        let c = config(AgentRole::Coder, &[AgentRole::Tester]);
        assert!(matches!(
            c.validate(),
            Err(AgentConfigError::BestRoleNotInRoles(_, AgentRole::Coder))
        ));
    }

    #[test]
    fn validate_rejects_empty_run_command() {
        let mut c = config(AgentRole::Coder, &[AgentRole::Coder]);
        c.run_command.clear();
        assert!(matches!(c.validate(), Err(AgentConfigError::MissingRunCommand(_))));
    }

    #[test]
    fn performance_running_average_and_success_rate() {
        let mut perf = AgentPerformance::default();
        perf.record(true, 100);
        perf.record(false, 300);
        assert_eq!(perf.tasks_completed, 2);
        assert!((perf.avg_task_ms - 200.0).abs() < 1e-9);
        assert!((perf.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(perf.error_count, 1);
    }
}
