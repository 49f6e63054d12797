#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **agentmux-lifecycle** – Agent Lifecycle Manager (spec §4.E).
//!
//! Owns the declared `AgentConfig` registry, the deterministic selection
//! scoring used by `execute_task`, session creation/readiness, periodic
//! health checking, and two-phase termination — all on top of the abstract
//! `agentmux_session::SessionHost` contract, so it never depends on which
//! backend (terminal multiplexer or plain subprocess) is live.
//!
//! Structurally generalized from
//! `toka-agent-runtime::process::AgentProcessManager`
//! (`examples/scrappyAI-Toka/crates/toka-agent-runtime/src/process.rs`):
//! a `DashMap` of per-agent runtime state guarded by the manager, periodic
//! `monitor_agents`-style health ticks, and a `shutdown` that tears down
//! every tracked session.

mod errors;
mod selection;
mod vendor;

pub use errors::LifecycleError;
pub use selection::{score_candidate, select_best};
pub use vendor::{VendorCredentials, VendorCredentialsError};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use agentmux_bus::{BusEvent, EventBus, CHANNEL_LIFECYCLE};
use agentmux_session::{SessionHandle, SessionHost};
use agentmux_types::{
    AgentConfig, AgentPerformance, AgentRole, AgentSession, AgentTask, SessionStatus, TaskStatus,
    TokenUsage,
};

/// Default deadline for an agent's task response (spec §4.E item 2).
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);
/// Default deadline for a freshly spawned session to report `idle`
/// (spec §4.E item 3).
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);
/// Default period between health-check ticks (spec §4.E item 4).
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Idle duration past which a session is considered unresponsive
/// (spec §4.E item 4).
pub const UNRESPONSIVE_THRESHOLD: Duration = Duration::from_secs(120);
/// Consecutive unresponsive health-check cycles before a session is
/// force-errored and removed (spec §4.E item 4).
pub const UNRESPONSIVE_CYCLE_LIMIT: u32 = 3;

/// Outcome of `execute_task` (spec §4.E item 2 / §3 `ExecuteResult`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the agent reported success.
    pub success: bool,
    /// Result payload, when successful.
    pub data: Option<Value>,
    /// Error message, when unsuccessful.
    pub error: Option<String>,
    /// Token usage reported with the response, if any.
    pub token_usage: Option<TokenUsage>,
    /// Wall-clock dispatch duration.
    pub duration_ms: u64,
}

/// The one-line JSON response an agent session is expected to emit after a
/// dispatched task (spec §4.E item 2).
#[derive(Debug, Deserialize)]
struct TaskResponse {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "tokenUsage")]
    token_usage: Option<TokenUsage>,
}

/// Registry of declared `AgentConfig`s plus the runtime session each has
/// (if any), and the machinery that moves tasks through them.
pub struct LifecycleManager {
    registry: DashMap<String, AgentConfig>,
    sessions: DashMap<String, RwLock<AgentSession>>,
    handles: DashMap<String, SessionHandle>,
    unresponsive_cycles: DashMap<String, u32>,
    session_host: Arc<dyn SessionHost>,
    bus: Arc<EventBus>,
    working_dir_root: PathBuf,
    task_timeout: Duration,
    ready_timeout: Duration,
}

impl LifecycleManager {
    /// Construct an empty manager. Agents must be registered with
    /// `register_agent` before they can be selected.
    pub fn new(
        session_host: Arc<dyn SessionHost>,
        bus: Arc<EventBus>,
        working_dir_root: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: DashMap::new(),
            sessions: DashMap::new(),
            handles: DashMap::new(),
            unresponsive_cycles: DashMap::new(),
            session_host,
            bus,
            working_dir_root,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        })
    }

    /// Validate and register a declared agent configuration
    /// (spec §4.E item 1, §7 `ConfigurationInvalid`).
    pub fn register_agent(&self, config: AgentConfig) -> Result<(), LifecycleError> {
        config.validate()?;
        info!(agent_id = %config.id, "agent registered");
        self.registry.insert(config.id.clone(), config);
        Ok(())
    }

    /// Declared agent ids.
    pub fn registered_agents(&self) -> Vec<String> {
        self.registry.iter().map(|e| e.key().clone()).collect()
    }

    /// Select an eligible agent, acquire or create its session, dispatch
    /// `task`, and await its response (spec §4.E item 2).
    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = ?task.task_type))]
    pub async fn execute_task(&self, mut task: AgentTask) -> Result<TaskResult, LifecycleError> {
        let started = std::time::Instant::now();
        let agent_id = self.select_agent(task.task_type).await?;

        let handle = self.ensure_session(&agent_id).await?;
        self.set_status(&agent_id, SessionStatus::Busy, Some(task.id.clone())).await;

        task.status = TaskStatus::InProgress;
        task.started_at = Some(Utc::now());

        let message = json!({
            "type": "task",
            "id": task.id,
            "description": task.description,
            "payload": task.payload,
            "priority": task.priority,
            "role": task.task_type,
        })
        .to_string();

        let mut output = self.session_host.read_output(&handle)?;
        self.session_host.send_instructions(&handle, &message).await?;

        let response = tokio::time::timeout(self.task_timeout, output.next_line()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match response {
            Ok(Some(line)) => self.handle_response(&agent_id, &line, duration_ms).await,
            Ok(None) => {
                self.record_outcome(&agent_id, false, duration_ms).await;
                Err(LifecycleError::AgentResponseTimeout {
                    agent_id: agent_id.clone(),
                    task_id: task.id.clone(),
                })
            }
            Err(_elapsed) => {
                self.record_outcome(&agent_id, false, duration_ms).await;
                Err(LifecycleError::AgentResponseTimeout {
                    agent_id: agent_id.clone(),
                    task_id: task.id.clone(),
                })
            }
        };

        self.set_status(&agent_id, SessionStatus::Idle, None).await;
        self.publish(
            "task:dispatched",
            json!({ "agentId": agent_id, "taskId": task.id, "success": result.is_ok() }),
        );
        result
    }

    async fn handle_response(
        &self,
        agent_id: &str,
        line: &str,
        duration_ms: u64,
    ) -> Result<TaskResult, LifecycleError> {
        let parsed: TaskResponse = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                warn!(agent_id, error = %e, "malformed task response, treating as failure");
                self.record_outcome(agent_id, false, duration_ms).await;
                return Ok(TaskResult {
                    success: false,
                    data: None,
                    error: Some(format!("malformed response: {e}")),
                    token_usage: None,
                    duration_ms,
                });
            }
        };

        self.record_outcome(agent_id, parsed.success, duration_ms).await;
        if let Some(usage) = &parsed.token_usage {
            self.record_token_usage(agent_id, usage.total).await;
        }

        Ok(TaskResult {
            success: parsed.success,
            data: parsed.data,
            error: parsed.error,
            token_usage: parsed.token_usage,
            duration_ms,
        })
    }

    async fn select_agent(&self, task_type: AgentRole) -> Result<String, LifecycleError> {
        let configs: Vec<AgentConfig> = self.registry.iter().map(|e| e.value().clone()).collect();
        let mut scored = Vec::with_capacity(configs.len());
        for config in &configs {
            let session_guard = match self.sessions.get(&config.id) {
                Some(s) => Some(s.read().await.clone()),
                None => None,
            };
            let remaining = remaining_daily(config.token_limits.daily, session_guard.as_ref());
            let score = score_candidate(config, task_type, remaining, session_guard.as_ref());
            let last_activity = session_guard.map(|s| s.last_activity);
            scored.push((config, score, last_activity));
        }
        select_best(scored.into_iter())
            .map(|c| c.id.clone())
            .ok_or(LifecycleError::NoSuitableAgent(task_type))
    }

    /// Acquire an existing idle/busy session for `agent_id`, or spawn a
    /// fresh one (spec §4.E item 3).
    #[instrument(skip(self))]
    pub async fn ensure_session(&self, agent_id: &str) -> Result<SessionHandle, LifecycleError> {
        if let Some(handle) = self.handles.get(agent_id) {
            return Ok(handle.clone());
        }

        let config = self
            .registry
            .get(agent_id)
            .ok_or_else(|| LifecycleError::UnknownAgent(agent_id.to_string()))?
            .clone();

        let cwd = self.working_dir_root.join(agent_id);
        tokio::fs::create_dir_all(&cwd)
            .await
            .map_err(|e| LifecycleError::Host(agentmux_session::SessionHostError::SpawnFailed {
                agent_id: agent_id.to_string(),
                source: e,
            }))?;
        self.write_agent_config_file(&cwd, &config).await?;
        if config.capabilities.net_access {
            self.write_vendor_config_if_available(&cwd, agent_id).await;
        }

        let handle = self.session_host.create_session(agent_id, &config, "", &cwd).await?;
        self.sessions.insert(agent_id.to_string(), RwLock::new(AgentSession::new(handle.session_id.clone(), agent_id)));
        self.handles.insert(agent_id.to_string(), handle.clone());

        wait_until_ready(self.ready_timeout, || async {
            self.set_status(agent_id, SessionStatus::Idle, None).await;
            true
        })
        .await
        .ok_or_else(|| LifecycleError::AgentNotReady(agent_id.to_string()))?;

        self.publish("session:started", json!({ "agentId": agent_id, "sessionId": handle.session_id }));
        Ok(handle)
    }

    async fn write_agent_config_file(
        &self,
        cwd: &std::path::Path,
        config: &AgentConfig,
    ) -> Result<(), LifecycleError> {
        let path = cwd.join("agent.json");
        let body = serde_json::to_vec_pretty(config).unwrap_or_default();
        tokio::fs::write(&path, body).await.map_err(|e| {
            LifecycleError::Host(agentmux_session::SessionHostError::SpawnFailed {
                agent_id: config.id.clone(),
                source: e,
            })
        })
    }

    async fn write_vendor_config_if_available(&self, cwd: &std::path::Path, agent_id: &str) {
        let prefix = agent_id.to_ascii_uppercase().replace('-', "_");
        match VendorCredentials::from_env(&prefix) {
            Ok(creds) => {
                let path = cwd.join("vendor_config.json");
                let doc = creds.to_vendor_config_json();
                if let Ok(body) = serde_json::to_vec_pretty(&doc) {
                    if let Err(e) = tokio::fs::write(&path, body).await {
                        warn!(agent_id, error = %e, "failed to write vendor config");
                    }
                }
            }
            Err(e) => {
                warn!(agent_id, error = %e, "no vendor credentials available, skipping");
            }
        }
    }

    async fn set_status(&self, agent_id: &str, status: SessionStatus, task: Option<String>) {
        if let Some(session) = self.sessions.get(agent_id) {
            let mut guard = session.write().await;
            guard.status = status;
            guard.current_task = task;
            guard.last_activity = Utc::now();
        }
    }

    async fn record_outcome(&self, agent_id: &str, success: bool, duration_ms: u64) {
        if let Some(session) = self.sessions.get(agent_id) {
            let mut guard = session.write().await;
            guard.performance.record(success, duration_ms);
            guard.last_activity = Utc::now();
        }
    }

    async fn record_token_usage(&self, agent_id: &str, tokens: u64) {
        if let Some(session) = self.sessions.get(agent_id) {
            let mut guard = session.write().await;
            guard.token_usage.total += tokens;
            guard.token_usage.last_updated = Some(Utc::now());
        }
    }

    /// Snapshot of one agent's runtime session, if any.
    pub async fn session_snapshot(&self, agent_id: &str) -> Option<AgentSession> {
        let session = self.sessions.get(agent_id)?;
        Some(session.read().await.clone())
    }

    /// Snapshot of one agent's rolling performance, if any.
    pub async fn performance_snapshot(&self, agent_id: &str) -> Option<AgentPerformance> {
        self.session_snapshot(agent_id).await.map(|s| s.performance)
    }

    /// Run one health-check tick across every tracked session
    /// (spec §4.E item 4).
    #[instrument(skip(self))]
    pub async fn health_check_tick(&self) {
        let now = Utc::now();
        let agent_ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();

        for agent_id in agent_ids {
            let is_stale = {
                let Some(session) = self.sessions.get(&agent_id) else { continue };
                session.read().await.idle_seconds(now) as u64 > UNRESPONSIVE_THRESHOLD.as_secs()
            };

            if !is_stale {
                self.unresponsive_cycles.remove(&agent_id);
                continue;
            }

            let cycles = {
                let mut entry = self.unresponsive_cycles.entry(agent_id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };

            if let Some(handle) = self.handles.get(&agent_id) {
                let ping = json!({ "type": "ping", "timestamp": now.timestamp() }).to_string();
                let _ = self.session_host.send_instructions(&handle, &ping).await;
            }

            if cycles >= UNRESPONSIVE_CYCLE_LIMIT {
                warn!(agent_id, "session unresponsive for {cycles} cycles, forcing error+removal");
                self.set_status(&agent_id, SessionStatus::Error, None).await;
                self.terminate_agent_session(&agent_id, "unresponsive").await;
                self.publish("session:error", json!({ "agentId": agent_id, "reason": "unresponsive" }));
            }
        }
    }

    /// Two-phase terminate the session for `agent_id`, if any
    /// (spec §4.E item 5).
    pub async fn terminate_agent_session(&self, agent_id: &str, reason: &str) {
        if let Some((_, handle)) = self.handles.remove(agent_id) {
            if let Err(e) = self.session_host.terminate_session(&handle, reason).await {
                warn!(agent_id, error = %e, "error terminating session");
            }
        }
        self.sessions.remove(agent_id);
        self.unresponsive_cycles.remove(agent_id);
        self.publish("session:terminated", json!({ "agentId": agent_id, "reason": reason }));
    }

    fn publish(&self, name: &str, payload: Value) {
        self.bus.publish(CHANNEL_LIFECYCLE, BusEvent::new(CHANNEL_LIFECYCLE, name, payload));
    }
}

fn remaining_daily(daily_limit: u64, session: Option<&AgentSession>) -> u64 {
    let used = session.map(|s| s.token_usage.total).unwrap_or(0);
    daily_limit.saturating_sub(used)
}

/// Poll `probe` every 100ms until it resolves `true` or `deadline` elapses.
/// Returns `None` on timeout, `Some(())` on success.
async fn wait_until_ready<F, Fut>(deadline: Duration, mut probe: F) -> Option<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if probe().await {
            return Some(());
        }
        if start.elapsed() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
