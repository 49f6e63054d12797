#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **agentmux-orchestrator** – Orchestrator Core (spec §4.I) and the
//! `AgentOrchestratorRuntime` facade that wires every subsystem together.
//!
//! The single-consumer loop (dequeue → assemble → budget → dispatch →
//! observe → emit) is structurally generalized from
//! `toka-orchestration::OrchestrationEngine` combined with
//! `toka-agent-runtime::process::AgentProcessManager`
//! (`examples/scrappyAI-Toka/crates/toka-orchestration/src/lib.rs`,
//! `examples/scrappyAI-Toka/crates/toka-agent-runtime/src/process.rs`):
//! a long-lived background task owning a `DashMap`/queue of work, driven by
//! periodic ticks for health and compaction, torn down by a `shutdown()`
//! that aborts every owned task. Parallel sub-task dispatch with
//! dependency sequencing reuses the teacher's own
//! `futures::future::join_all` idiom (`toka-orchestration::lib` imports it
//! for exactly this "run a wave of independent futures" shape).

mod complexity;
mod degraded;
mod errors;
mod history;
mod queue;
pub mod telemetry;

pub use errors::OrchestratorError;
pub use history::ProcessingRecord;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, instrument, warn};

use agentmux_bus::{BusEvent, EventBus, CHANNEL_SIGNALS};
use agentmux_context::{ContextManager, ContextManagerConfig};
use agentmux_guidelines::GuidelineRegistry;
use agentmux_lifecycle::LifecycleManager;
use agentmux_logstream::{LogStreamer, StreamerConfig};
use agentmux_session::SessionHost;
use agentmux_types::{AgentConfig, AgentRole, AgentTask, Guideline, Signal, WarRoomSection};

/// Priority at and above which `SignalKind::is_fatal` short-circuits
/// normal selection (spec §4.I failure policy).
pub const FATAL_PRIORITY: u8 = 10;

/// Tuning knobs for one `Orchestrator` (spec §3/§4.I/§4.F defaults).
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Target model's context window handed to the Token Distributor.
    pub model_window: u32,
    /// Trailing-window size for the degraded-mode error-rate tracker.
    pub degraded_window: usize,
    /// Failure-ratio threshold that trips degraded mode.
    pub degraded_threshold: f64,
    /// Trailing-window size for the complexity fingerprint.
    pub complexity_window: usize,
    /// Period between background context-compaction ticks.
    pub compaction_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model_window: 200_000,
            degraded_window: degraded::DEFAULT_WINDOW,
            degraded_threshold: degraded::DEFAULT_THRESHOLD,
            complexity_window: complexity::DEFAULT_WINDOW,
            compaction_interval: Duration::from_secs(60),
        }
    }
}

/// A requested parallel sub-task (spec §4.I dispatch option (b)): carried
/// in a signal's `payload["subtasks"]` when `payload["parallel"] == true`.
#[derive(Debug, Clone, Deserialize)]
struct SubTaskSpec {
    id: String,
    description: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

fn parse_subtasks(signal: &Signal) -> Option<Vec<SubTaskSpec>> {
    let wants_parallel = signal.payload.get("parallel").and_then(Value::as_bool).unwrap_or(false);
    if !wants_parallel {
        return None;
    }
    let raw = signal.payload.get("subtasks")?;
    serde_json::from_value(raw.clone()).ok()
}

/// Which `AgentRole` a signal's dispatched task should target. Spec is
/// silent on this mapping; the dispatcher reads an optional
/// `payload["role"]` string (matching an `AgentRole` variant's
/// `snake_case` name) and falls back to `Generalist` (see DESIGN.md).
fn task_role(signal: &Signal) -> AgentRole {
    signal
        .payload
        .get("role")
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
        .unwrap_or(AgentRole::Generalist)
}

fn task_description(signal: &Signal) -> String {
    format!("signal {:?} from {}", signal.kind, signal.source)
}

/// Owns the priority queue and drives the single-consumer processing loop
/// (spec §4.I). Constructed once and shared via `Arc` with its own
/// background tasks.
pub struct Orchestrator {
    queue: queue::SignalQueue,
    context: Arc<ContextManager>,
    guidelines: Arc<GuidelineRegistry>,
    lifecycle: Arc<LifecycleManager>,
    bus: Arc<EventBus>,
    history: history::ProcessingHistory,
    fingerprint: complexity::ComplexityFingerprint,
    error_rate: degraded::ErrorRateTracker,
    degraded: AtomicBool,
    started: AtomicBool,
    accepting: AtomicBool,
    config: OrchestratorConfig,
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    health_check_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    compaction_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Orchestrator {
    /// Construct an orchestrator over already-built subsystems.
    pub fn new(
        bus: Arc<EventBus>,
        context: Arc<ContextManager>,
        guidelines: Arc<GuidelineRegistry>,
        lifecycle: Arc<LifecycleManager>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            queue: queue::SignalQueue::new(),
            context,
            guidelines,
            lifecycle,
            bus,
            history: history::ProcessingHistory::new(),
            fingerprint: complexity::ComplexityFingerprint::new(config.complexity_window),
            error_rate: degraded::ErrorRateTracker::new(config.degraded_window, config.degraded_threshold),
            degraded: AtomicBool::new(false),
            started: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
            config,
            loop_handle: Mutex::new(None),
            health_check_handle: Mutex::new(None),
            compaction_handle: Mutex::new(None),
        }
    }

    /// Enqueue `signal` for processing. Rejected once `shutdown()` has
    /// begun.
    pub async fn enqueue(&self, signal: Signal) -> Result<(), OrchestratorError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ShuttingDown);
        }
        self.queue.enqueue(signal).await;
        Ok(())
    }

    /// Number of signals currently queued.
    pub async fn queue_len(&self) -> usize {
        self.queue.len().await
    }

    /// Whether the orchestrator is currently refusing new non-fatal work
    /// (spec §4.I failure policy).
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// The `n` most recent processing-history entries, oldest first.
    pub async fn recent_history(&self, n: usize) -> Vec<history::ProcessingRecord> {
        self.history.recent(n).await
    }

    /// Spawn the processing loop and background ticks. Fails without side
    /// effect if already started.
    pub async fn start(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyStarted);
        }

        let worker = self.clone();
        let loop_handle = tokio::spawn(async move { worker.run_loop().await });
        *self.loop_handle.lock().await = Some(loop_handle);

        let health = self.clone();
        let health_handle = tokio::spawn(async move { health.health_check_loop().await });
        *self.health_check_handle.lock().await = Some(health_handle);

        let compaction = self.clone();
        let compaction_handle = tokio::spawn(async move { compaction.compaction_loop().await });
        *self.compaction_handle.lock().await = Some(compaction_handle);

        info!("orchestrator started");
        Ok(())
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            let signal = self.queue.dequeue().await;
            self.process_signal(signal).await;
            tokio::task::yield_now().await;
        }
    }

    async fn health_check_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(agentmux_lifecycle::DEFAULT_HEALTH_CHECK_INTERVAL);
        loop {
            ticker.tick().await;
            self.lifecycle.health_check_tick().await;
        }
    }

    async fn compaction_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.compaction_interval);
        loop {
            ticker.tick().await;
            self.context.compact().await;
        }
    }

    /// Drain the queue, stop every background task, and two-phase
    /// terminate every live session (spec §4.E item 5, SPEC_FULL §10.3).
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);

        if let Some(handle) = self.loop_handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        while let Some(signal) = self.queue.try_dequeue().await {
            self.process_signal(signal).await;
        }

        if let Some(handle) = self.health_check_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.compaction_handle.lock().await.take() {
            handle.abort();
        }

        for agent_id in self.lifecycle.registered_agents() {
            self.lifecycle.terminate_agent_session(&agent_id, "orchestrator shutdown").await;
        }
        info!("orchestrator shutdown complete");
    }

    #[instrument(skip(self, signal), fields(signal_id = %signal.id, kind = ?signal.kind, priority = signal.priority))]
    async fn process_signal(&self, signal: Signal) {
        self.fingerprint.observe(signal.kind).await;

        if signal.kind.is_fatal() {
            self.escalate(&signal, "fatal-class signal short-circuited dispatch").await;
            return;
        }

        if self.degraded.load(Ordering::SeqCst) {
            self.refuse_degraded(&signal).await;
            return;
        }

        match self.dispatch_and_observe(&signal).await {
            Ok((success, _duration_ms, _token_usage)) => {
                self.publish_signal_event(if success { "signal_processed" } else { "signal_error" }, &signal, success, None);
                let now_degraded = self.error_rate.record(success).await;
                self.update_degraded(now_degraded).await;
            }
            Err(OrchestratorError::NoSuitableAgent) => {
                self.escalate(&signal, "no suitable agent").await;
            }
            Err(e) => {
                self.publish_signal_event("signal_error", &signal, false, Some(e.to_string()));
                let now_degraded = self.error_rate.record(false).await;
                self.update_degraded(now_degraded).await;
            }
        }
    }

    /// Steps 2–5 of spec §4.I: assemble context, budget, dispatch, observe.
    /// Returns `(success, duration_ms, token_usage)`.
    async fn dispatch_and_observe(&self, signal: &Signal) -> Result<(bool, u64, u64), OrchestratorError> {
        let started = Instant::now();

        // Assemble (spec §4.I item 2): everything below is gathered for
        // its side effects (guideline triggers, budget allocation) even
        // though only the dispatch outcome feeds the return value — a
        // richer `DispatchContext` snapshot is available to callers via
        // `Orchestrator::recent_history`/`ContextManager::war_room_status`
        // directly.
        let _war_room_snapshot = self.context.war_room_status().await;
        let _recent_decisions = self.history.recent(10).await;
        let _active_agent_ids = self.lifecycle.registered_agents();
        let _triggered_executions = self.guidelines.process_signal(signal);
        let complexity = self.fingerprint.classify().await;

        // Budget (spec §4.I item 3).
        let active_agents = self.lifecycle.registered_agents().len().max(1) as u32;
        let _allocation = agentmux_budget::allocate(
            agentmux_budget::BudgetInputs { active_agents, model_window: self.config.model_window, complexity },
            self.bus.as_ref(),
        );

        let item_text = format!("signal {} ({:?})", signal.id, signal.kind);
        self.context.add_to_war_room(WarRoomSection::Doing, item_text.clone()).await;

        // Dispatch (spec §4.I item 4).
        let (success, token_usage) = match parse_subtasks(signal) {
            Some(specs) => self.dispatch_parallel(signal, specs).await?,
            None => self.dispatch_direct(signal).await?,
        };

        // Observe (spec §4.I item 5).
        let target = if success { WarRoomSection::Done } else { WarRoomSection::Blockers };
        self.context.move_in_war_room(WarRoomSection::Doing, target, &item_text).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        self.history
            .record(history::ProcessingRecord {
                signal_id: signal.id,
                timestamp: Utc::now(),
                token_usage,
                duration_ms,
                success,
            })
            .await;

        Ok((success, duration_ms, token_usage))
    }

    async fn dispatch_direct(&self, signal: &Signal) -> Result<(bool, u64), OrchestratorError> {
        let role = task_role(signal);
        let task = AgentTask::new(
            signal.id.to_string(),
            role,
            task_description(signal),
            Some(json!({ "signalId": signal.id })),
            signal.priority,
        );
        match self.lifecycle.execute_task(task).await {
            Ok(result) => Ok((result.success, result.token_usage.map(|u| u.total).unwrap_or(0))),
            Err(agentmux_lifecycle::LifecycleError::NoSuitableAgent(_)) => Err(OrchestratorError::NoSuitableAgent),
            Err(_other) => Ok((false, 0)),
        }
    }

    /// Run `specs` in dependency waves: every sub-task whose
    /// `dependencies` are already complete runs concurrently with its
    /// wave-mates via `futures::future::join_all`; the next wave starts
    /// only once the current one finishes (spec §4.I dispatch option (b)).
    async fn dispatch_parallel(
        &self,
        signal: &Signal,
        specs: Vec<SubTaskSpec>,
    ) -> Result<(bool, u64), OrchestratorError> {
        let mut remaining = specs;
        let mut completed: HashSet<String> = HashSet::new();
        let mut all_success = true;
        let mut total_tokens = 0u64;
        let mut saw_no_suitable_agent = false;
        let role = task_role(signal);

        while !remaining.is_empty() {
            let (ready, not_ready): (Vec<_>, Vec<_>) =
                remaining.into_iter().partition(|spec| spec.dependencies.iter().all(|d| completed.contains(d)));

            if ready.is_empty() {
                // Every remaining sub-task depends on one that will never
                // complete (unresolvable or cyclic dependency list).
                warn!(signal_id = %signal.id, "parallel sub-tasks have an unresolvable dependency chain");
                all_success = false;
                break;
            }

            let futures = ready.iter().map(|spec| {
                let task = AgentTask::new(
                    spec.id.clone(),
                    role,
                    spec.description.clone(),
                    Some(json!({ "signalId": signal.id, "subTaskId": spec.id })),
                    signal.priority,
                );
                let lifecycle = self.lifecycle.clone();
                async move { lifecycle.execute_task(task).await }
            });

            for (spec, result) in ready.iter().zip(join_all(futures).await) {
                match result {
                    Ok(r) => {
                        all_success &= r.success;
                        total_tokens += r.token_usage.map(|u| u.total).unwrap_or(0);
                        completed.insert(spec.id.clone());
                    }
                    Err(agentmux_lifecycle::LifecycleError::NoSuitableAgent(_)) => {
                        saw_no_suitable_agent = true;
                        all_success = false;
                    }
                    Err(_other) => {
                        all_success = false;
                    }
                }
            }

            remaining = not_ready;
        }

        if saw_no_suitable_agent {
            return Err(OrchestratorError::NoSuitableAgent);
        }
        Ok((all_success, total_tokens))
    }

    async fn escalate(&self, signal: &Signal, reason: &str) {
        warn!(signal_id = %signal.id, reason, "escalating signal");
        // Clear out the in-flight Doing marker left by `dispatch_and_observe`
        // (absent when a fatal-class signal short-circuited before dispatch
        // ever ran) so it doesn't linger as a stale in-progress item.
        let doing_item = format!("signal {} ({:?})", signal.id, signal.kind);
        self.context.move_in_war_room(WarRoomSection::Doing, WarRoomSection::Blockers, &doing_item).await;
        self.context.add_to_war_room(WarRoomSection::Blockers, format!("escalation: {reason} ({})", signal.id)).await;
        self.history
            .record(history::ProcessingRecord {
                signal_id: signal.id,
                timestamp: Utc::now(),
                token_usage: 0,
                duration_ms: 0,
                success: false,
            })
            .await;
        self.publish_signal_event("signal_error", signal, false, Some(reason.to_string()));
        let now_degraded = self.error_rate.record(false).await;
        self.update_degraded(now_degraded).await;
    }

    async fn refuse_degraded(&self, signal: &Signal) {
        warn!(signal_id = %signal.id, "refusing non-fatal signal while degraded");
        self.history
            .record(history::ProcessingRecord {
                signal_id: signal.id,
                timestamp: Utc::now(),
                token_usage: 0,
                duration_ms: 0,
                success: false,
            })
            .await;
        self.publish_signal_event("signal_error", signal, false, Some("orchestrator is in degraded mode".to_string()));
    }

    /// Idempotent toggle, mirroring `GuidelineRegistry::set_enabled`: emits
    /// `degraded_mode` only when the state actually changes.
    async fn update_degraded(&self, is_degraded: bool) {
        let was = self.degraded.swap(is_degraded, Ordering::SeqCst);
        if was == is_degraded {
            return;
        }
        if is_degraded {
            warn!("orchestrator entering degraded mode");
        } else {
            info!("orchestrator exiting degraded mode");
        }
        self.bus.publish(
            CHANNEL_SIGNALS,
            BusEvent::new(CHANNEL_SIGNALS, "degraded_mode", json!({ "enabled": is_degraded })),
        );
    }

    fn publish_signal_event(&self, name: &str, signal: &Signal, success: bool, error: Option<String>) {
        self.bus.publish(
            CHANNEL_SIGNALS,
            BusEvent::new(
                CHANNEL_SIGNALS,
                name,
                json!({ "signalId": signal.id, "kind": signal.kind, "success": success, "error": error }),
            ),
        );
    }
}

/// Top-level runtime facade wiring the event bus, every subsystem, and the
/// log streamer into one handle — the thing a binary (or an integration
/// test) actually constructs (SPEC_FULL §10.5).
pub struct AgentOrchestratorRuntime {
    inner: Arc<Orchestrator>,
    log_streamer: Arc<LogStreamer>,
}

impl AgentOrchestratorRuntime {
    /// Wire a fresh runtime: event bus, lifecycle manager, context manager,
    /// guideline registry, log streamer, and orchestrator, all sharing one
    /// `EventBus`. Detected signals flow from the log streamer straight
    /// into the orchestrator's queue.
    pub fn new(session_host: Arc<dyn SessionHost>, working_dir_root: PathBuf, config: OrchestratorConfig) -> Self {
        let bus = Arc::new(EventBus::default());
        let lifecycle = LifecycleManager::new(session_host.clone(), bus.clone(), working_dir_root);
        let context = Arc::new(ContextManager::new(ContextManagerConfig::default(), bus.clone()));
        let guidelines = Arc::new(GuidelineRegistry::new(bus.clone()));

        let (signal_tx, mut signal_rx) = mpsc::channel(256);
        let log_streamer = LogStreamer::new(session_host, bus.clone(), StreamerConfig::default(), signal_tx);

        let inner = Arc::new(Orchestrator::new(bus, context, guidelines, lifecycle, config));

        let forward_target = inner.clone();
        tokio::spawn(async move {
            while let Some(signal) = signal_rx.recv().await {
                let _ = forward_target.enqueue(signal).await;
            }
        });

        Self { inner, log_streamer }
    }

    /// Register a declared agent configuration (spec §4.E item 1).
    pub fn register_agent(&self, config: AgentConfig) -> Result<(), agentmux_lifecycle::LifecycleError> {
        self.inner.lifecycle.register_agent(config)
    }

    /// Register a guideline (spec §4.H).
    pub fn register_guideline(&self, guideline: Guideline) -> Result<(), agentmux_guidelines::GuidelinesError> {
        self.inner.guidelines.register_guideline(guideline)
    }

    /// Enqueue a signal for orchestrator processing.
    pub async fn enqueue_signal(&self, signal: Signal) -> Result<(), OrchestratorError> {
        self.inner.enqueue(signal).await
    }

    /// Start the orchestrator's processing loop and background ticks.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        self.inner.start().await
    }

    /// Gracefully shut everything down: stop streaming, drain the signal
    /// queue, cancel background tasks, and terminate every live session
    /// (SPEC_FULL §10.3).
    pub async fn shutdown(&self) {
        self.log_streamer.shutdown().await;
        self.inner.shutdown().await;
    }

    /// Shared event bus, for test/metrics subscribers.
    pub fn bus(&self) -> Arc<EventBus> {
        self.inner.bus.clone()
    }

    /// The Context Manager, for direct war-room/context inspection.
    pub fn context(&self) -> Arc<ContextManager> {
        self.inner.context.clone()
    }

    /// The Lifecycle Manager, for direct session/performance inspection.
    pub fn lifecycle(&self) -> Arc<LifecycleManager> {
        self.inner.lifecycle.clone()
    }

    /// The Guideline Registry, for direct catalog inspection.
    pub fn guidelines(&self) -> Arc<GuidelineRegistry> {
        self.inner.guidelines.clone()
    }

    /// Whether the orchestrator is currently in degraded mode.
    pub fn is_degraded(&self) -> bool {
        self.inner.is_degraded()
    }

    /// The `n` most recent processing-history entries, oldest first.
    pub async fn recent_history(&self, n: usize) -> Vec<history::ProcessingRecord> {
        self.inner.recent_history(n).await
    }

    /// Number of signals currently queued.
    pub async fn queue_len(&self) -> usize {
        self.inner.queue_len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    use agentmux_session::subprocess::SubprocessSessionHost;
    use agentmux_types::{AgentBackendKind, AgentCapabilities, SignalKind, TokenLimits};
    use std::collections::HashSet as StdHashSet;

    fn cat_config(id: &str) -> AgentConfig {
        AgentConfig {
            id: id.into(),
            role: AgentRole::Generalist,
            kind: AgentBackendKind::Subprocess,
            roles: StdHashSet::from([AgentRole::Generalist]),
            run_command: vec!["cat".into()],
            token_limits: TokenLimits { daily: 1_000_000, weekly: 1_000_000, monthly: 1_000_000 },
            capabilities: AgentCapabilities::default(),
        }
    }

    fn test_orchestrator(tmp: &tempfile::TempDir) -> (Arc<Orchestrator>, Arc<dyn SessionHost>) {
        let host: Arc<dyn SessionHost> = Arc::new(SubprocessSessionHost::new());
        let bus = Arc::new(EventBus::default());
        let lifecycle = LifecycleManager::new(host.clone(), bus.clone(), tmp.path().to_path_buf());
        let context = Arc::new(ContextManager::new(ContextManagerConfig::default(), bus.clone()));
        let guidelines = Arc::new(GuidelineRegistry::new(bus.clone()));
        (Arc::new(Orchestrator::new(bus, context, guidelines, lifecycle, OrchestratorConfig::default())), host)
    }

    fn signal(kind: SignalKind, priority: u8) -> Signal {
        Signal::new(kind, priority, "scanner:test", StdHashMap::new()).unwrap()
    }

    #[tokio::test]
    async fn no_suitable_agent_produces_escalation_not_plain_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, _host) = test_orchestrator(&tmp);
        let bus = orch.bus.clone();

        let (tx, mut rx) = mpsc::channel(16);
        bus.subscribe(CHANNEL_SIGNALS, move |event| {
            let _ = tx.try_send(event);
        });

        orch.process_signal(signal(SignalKind::Tp, 5)).await;

        let evt = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(evt.name, "signal_error");

        let status = orch.context.war_room_status().await;
        let blockers = status.sections.iter().find(|(s, _)| *s == WarRoomSection::Blockers).unwrap();
        assert!(blockers.1.iter().any(|item| item.text.contains("escalation")));
    }

    #[tokio::test]
    async fn fatal_signal_short_circuits_before_dispatch() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, _host) = test_orchestrator(&tmp);

        orch.process_signal(signal(SignalKind::FfFatal, FATAL_PRIORITY)).await;

        let history = orch.recent_history(1).await;
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
    }

    #[tokio::test]
    async fn successful_direct_dispatch_moves_war_room_item_to_done() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, host) = test_orchestrator(&tmp);
        orch.lifecycle.register_agent(cat_config("a1")).unwrap();

        let sig = signal(SignalKind::Tp, 5);
        let sig_id = sig.id;
        let orch2 = orch.clone();
        let host2 = host.clone();
        let responder = tokio::spawn(async move {
            loop {
                if let Some(snapshot) = orch2.lifecycle.session_snapshot("a1").await {
                    if snapshot.status == agentmux_types::SessionStatus::Busy {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let handle = orch2.lifecycle.ensure_session("a1").await.unwrap();
            let response = json!({ "success": true, "data": null });
            host2.send_instructions(&handle, &response.to_string()).await.unwrap();
        });

        orch.process_signal(sig).await;
        let _ = responder.await;

        let status = orch.context.war_room_status().await;
        let done = status.sections.iter().find(|(s, _)| *s == WarRoomSection::Done).unwrap();
        assert!(done.1.iter().any(|item| item.text.contains(&sig_id.to_string())));
    }

    #[tokio::test]
    async fn start_twice_fails_without_spawning_a_second_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, _host) = test_orchestrator(&tmp);
        orch.start().await.unwrap();
        let err = orch.start().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyStarted));
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn degraded_mode_trips_after_repeated_failures_and_refuses_new_work() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = OrchestratorConfig::default();
        config.degraded_window = 4;
        config.degraded_threshold = 0.5;
        let host: Arc<dyn SessionHost> = Arc::new(SubprocessSessionHost::new());
        let bus = Arc::new(EventBus::default());
        let lifecycle = LifecycleManager::new(host, bus.clone(), tmp.path().to_path_buf());
        let context = Arc::new(ContextManager::new(ContextManagerConfig::default(), bus.clone()));
        let guidelines = Arc::new(GuidelineRegistry::new(bus.clone()));
        let orch = Arc::new(Orchestrator::new(bus, context, guidelines, lifecycle, config));

        for _ in 0..3 {
            orch.process_signal(signal(SignalKind::Tp, 5)).await;
        }
        assert!(orch.is_degraded());

        let before = orch.history.len().await;
        orch.process_signal(signal(SignalKind::Tp, 5)).await;
        let after = orch.history.len().await;
        assert_eq!(after, before + 1, "refused signal still gets a history record");
    }
}
