#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **agentmux-guidelines** – Guidelines Registry & Dispatcher (spec §4.H).
//!
//! Generalized from `toka-rule-metadata::catalogue` + `toka-orchestration::dependency`
//! (`examples/scrappyAI-Toka/crates/toka-rule-metadata/src/catalogue.rs`,
//! `examples/scrappyAI-Toka/crates/toka-orchestration/src/dependency.rs`):
//! a `DashMap`-backed catalog keyed by id, validated on insert, with a
//! `DependencyResolver`-style consistency check run against the *existing*
//! catalog rather than precomputed at load time (guidelines register and
//! unregister one at a time at runtime, unlike the teacher's batch
//! workstream load).

pub mod errors;
pub mod requirements;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use agentmux_bus::{BusEvent, EventBus, CHANNEL_GUIDELINES};
use agentmux_types::{Execution, ExecutionStatus, Guideline, GuidelineMetrics, Signal};

pub use errors::GuidelinesError;

/// Guideline catalog: registration, enable/disable, signal dispatch, and
/// execution tracking (spec §4.H).
pub struct GuidelineRegistry {
    guidelines: DashMap<String, Guideline>,
    metrics: DashMap<String, GuidelineMetrics>,
    executions: DashMap<Uuid, Arc<Mutex<Execution>>>,
    bus: Arc<EventBus>,
}

impl GuidelineRegistry {
    /// Construct an empty catalog, publishing events on `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            guidelines: DashMap::new(),
            metrics: DashMap::new(),
            executions: DashMap::new(),
            bus,
        }
    }

    /// `registerGuideline(g)`: validates field invariants, then checks
    /// that every id in `g.dependencies` is already registered (the
    /// dependents graph must stay acyclic and fully resolved — spec
    /// §4.H "enforces dependents graph consistency").
    #[instrument(skip(self, guideline), fields(guideline_id = %guideline.id))]
    pub fn register_guideline(&self, guideline: Guideline) -> Result<(), GuidelinesError> {
        guideline.validate()?;
        for dep in &guideline.dependencies {
            if !self.guidelines.contains_key(dep) {
                return Err(agentmux_types::GuidelineError::DependentsInconsistent(
                    guideline.id.clone(),
                    format!("depends on unregistered guideline {dep}"),
                )
                .into());
            }
        }
        self.metrics.entry(guideline.id.clone()).or_default();
        let id = guideline.id.clone();
        self.guidelines.insert(id.clone(), guideline);
        info!(guideline_id = %id, "guideline registered");
        Ok(())
    }

    /// `unregisterGuideline(id)`: rejects if any other registered
    /// guideline depends on `id`.
    #[instrument(skip(self))]
    pub fn unregister_guideline(&self, id: &str) -> Result<(), GuidelinesError> {
        if !self.guidelines.contains_key(id) {
            return Err(GuidelinesError::UnknownGuideline(id.to_string()));
        }
        let dependents: Vec<String> = self
            .guidelines
            .iter()
            .filter(|e| e.value().id != id && e.value().dependencies.iter().any(|d| d == id))
            .map(|e| e.value().id.clone())
            .collect();
        if !dependents.is_empty() {
            return Err(agentmux_types::GuidelineError::DependentsInconsistent(
                id.to_string(),
                format!("still depended on by {dependents:?}"),
            )
            .into());
        }
        self.guidelines.remove(id);
        self.metrics.remove(id);
        Ok(())
    }

    /// `setEnabled(id, bool)`: idempotent toggle. Emits `guideline_toggled`
    /// only when the flag actually changes.
    #[instrument(skip(self))]
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), GuidelinesError> {
        let mut entry = self
            .guidelines
            .get_mut(id)
            .ok_or_else(|| GuidelinesError::UnknownGuideline(id.to_string()))?;
        if entry.enabled == enabled {
            return Ok(());
        }
        entry.enabled = enabled;
        drop(entry);
        self.bus.publish(
            CHANNEL_GUIDELINES,
            BusEvent::new(
                CHANNEL_GUIDELINES,
                "guideline_toggled",
                serde_json::json!({ "guidelineId": id, "enabled": enabled }),
            ),
        );
        Ok(())
    }

    /// `processSignal(signal)`: for each enabled guideline whose protocol
    /// triggers include `signal.kind`, checks requirements and (if met)
    /// creates a `pending` `Execution` and emits `guideline_triggered`.
    /// Guidelines with unmet requirements are skipped, not failed — no
    /// execution is created for them.
    #[instrument(skip(self, signal), fields(signal_id = %signal.id, signal_kind = ?signal.kind))]
    pub fn process_signal(&self, signal: &Signal) -> Vec<Uuid> {
        let mut created = Vec::new();
        let matching: Vec<Guideline> = self
            .guidelines
            .iter()
            .filter(|e| e.value().enabled && e.value().protocol.triggers.contains(&signal.kind))
            .map(|e| e.value().clone())
            .collect();

        for guideline in matching {
            let unmet = requirements::unmet_requirements(&guideline.requirements);
            if !unmet.is_empty() {
                warn!(guideline_id = %guideline.id, ?unmet, "guideline requirements unmet, skipping trigger");
                self.bus.publish(
                    CHANNEL_GUIDELINES,
                    BusEvent::new(
                        CHANNEL_GUIDELINES,
                        "requirement_unsatisfied",
                        serde_json::json!({
                            "guidelineId": guideline.id,
                            "signalId": signal.id,
                            "unmet": unmet,
                        }),
                    ),
                );
                continue;
            }

            let execution = Execution {
                id: Uuid::new_v4(),
                guideline_id: guideline.id.clone(),
                triggering_signal: signal.id,
                status: ExecutionStatus::Pending,
                created_at: Utc::now(),
                completed_at: None,
                token_cost: None,
            };
            let execution_id = execution.id;
            self.executions.insert(execution_id, Arc::new(Mutex::new(execution)));
            self.metrics.entry(guideline.id.clone()).or_default().total_executions += 1;

            self.bus.publish(
                CHANNEL_GUIDELINES,
                BusEvent::new(
                    CHANNEL_GUIDELINES,
                    "guideline_triggered",
                    serde_json::json!({
                        "guidelineId": guideline.id,
                        "executionId": execution_id,
                        "signalId": signal.id,
                    }),
                ),
            );
            created.push(execution_id);
        }
        created
    }

    /// Transition an execution from `pending` to `running`.
    pub async fn start_execution(&self, execution_id: Uuid) -> Result<(), GuidelinesError> {
        self.transition(execution_id, ExecutionStatus::Pending, ExecutionStatus::Running).await
    }

    /// Transition an execution from `running` to `completed`, folding the
    /// outcome into its guideline's rolling metrics.
    pub async fn complete_execution(
        &self,
        execution_id: Uuid,
        duration_ms: u64,
        token_cost: u32,
    ) -> Result<(), GuidelinesError> {
        self.finish(execution_id, true, duration_ms, token_cost).await
    }

    /// Transition an execution from `running` to `failed`, folding the
    /// outcome into its guideline's rolling metrics.
    pub async fn fail_execution(
        &self,
        execution_id: Uuid,
        duration_ms: u64,
        token_cost: u32,
    ) -> Result<(), GuidelinesError> {
        self.finish(execution_id, false, duration_ms, token_cost).await
    }

    async fn transition(
        &self,
        execution_id: Uuid,
        from: ExecutionStatus,
        to: ExecutionStatus,
    ) -> Result<(), GuidelinesError> {
        let lock = self
            .executions
            .get(&execution_id)
            .map(|e| e.value().clone())
            .ok_or(GuidelinesError::UnknownExecution(execution_id))?;
        let mut exec = lock.lock().await;
        if exec.status != from {
            return Err(GuidelinesError::InvalidTransition { execution_id, from: exec.status, to });
        }
        exec.status = to;
        Ok(())
    }

    async fn finish(
        &self,
        execution_id: Uuid,
        success: bool,
        duration_ms: u64,
        token_cost: u32,
    ) -> Result<(), GuidelinesError> {
        let lock = self
            .executions
            .get(&execution_id)
            .map(|e| e.value().clone())
            .ok_or(GuidelinesError::UnknownExecution(execution_id))?;
        let mut exec = lock.lock().await;
        if exec.status != ExecutionStatus::Running {
            let to = if success { ExecutionStatus::Completed } else { ExecutionStatus::Failed };
            return Err(GuidelinesError::InvalidTransition { execution_id, from: exec.status, to });
        }
        exec.status = if success { ExecutionStatus::Completed } else { ExecutionStatus::Failed };
        exec.completed_at = Some(Utc::now());
        exec.token_cost = Some(token_cost);
        let guideline_id = exec.guideline_id.clone();
        drop(exec);

        self.metrics.entry(guideline_id).or_default().record(success, duration_ms, token_cost);
        Ok(())
    }

    /// Current rolling metrics for a guideline, if registered.
    pub fn guideline_metrics(&self, id: &str) -> Option<GuidelineMetrics> {
        self.metrics.get(id).map(|m| *m.value())
    }

    /// Snapshot of a tracked execution, if it exists.
    pub async fn execution(&self, execution_id: Uuid) -> Option<Execution> {
        let lock = self.executions.get(&execution_id).map(|e| e.value().clone())?;
        Some(lock.lock().await.clone())
    }

    /// All registered guidelines, for introspection (SPEC_FULL §10.4).
    pub fn registered_guidelines(&self) -> Vec<Guideline> {
        self.guidelines.iter().map(|e| e.value().clone()).collect()
    }
}
