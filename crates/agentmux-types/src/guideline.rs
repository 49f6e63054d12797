//! Declarative guideline/workflow shape (spec §3, §4.H).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::SignalKind;

/// Broad classification a guideline belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidelineCategory {
    /// Code or security review workflows.
    Review,
    /// Test-failure triage workflows.
    Testing,
    /// Release/merge workflows.
    Release,
    /// Catch-all for anything else.
    Other(String),
}

/// One decision point within a protocol step: a named gate whose outcome
/// branches the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPoint {
    /// Human-readable question/gate name.
    pub name: String,
    /// Possible outcomes, e.g. `["approve", "request_changes"]`.
    pub outcomes: Vec<String>,
}

/// One step of a guideline's protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStep {
    /// Step name, unique within the protocol.
    pub name: String,
    /// Typed output this step is expected to produce (free-form label).
    pub output_type: String,
    /// Decision points reached during this step, if any.
    pub decision_points: Vec<DecisionPoint>,
    /// Criteria that must hold for the step to be considered successful.
    pub success_criteria: Vec<String>,
    /// Action to take if the step fails.
    pub fallback_action: Option<String>,
}

/// A guideline's full declarative protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    /// Signal kinds that trigger this guideline (spec §4.H `processSignal`).
    pub triggers: Vec<SignalKind>,
    /// Ordered steps.
    pub steps: Vec<ProtocolStep>,
}

/// A declarative, signal-triggered workflow template (spec §3 `Guideline`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guideline {
    /// Stable identifier.
    pub id: String,
    /// Classification.
    pub category: GuidelineCategory,
    /// Dispatch priority among concurrently-triggered guidelines.
    pub priority: u8,
    /// Whether this guideline is currently active.
    pub enabled: bool,
    /// Declarative protocol.
    pub protocol: Protocol,
    /// Named, gated requirement checks (e.g. `"GitHub API access"`).
    pub requirements: Vec<String>,
    /// Inspector/orchestrator prompt templates with `{{placeholders}}`.
    pub prompts: HashMap<String, String>,
    /// Token budget ceilings for executions of this guideline.
    pub token_limits: u32,
    /// Tool names this guideline's steps may invoke.
    pub tools: Vec<String>,
    /// Ids of guidelines this one depends on.
    pub dependencies: Vec<String>,
}

/// Errors raised validating a `Guideline` (spec §4.H `registerGuideline`).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GuidelineError {
    /// `id` was empty or not well-formed (only ascii alphanumerics, `-`, `_`).
    #[error("malformed guideline id: {0:?}")]
    MalformedId(String),
    /// `protocol.steps` was empty.
    #[error("guideline {0} has no protocol steps")]
    NoSteps(String),
    /// A prompt template string was empty.
    #[error("guideline {0} has an empty prompt for {1:?}")]
    EmptyPrompt(String, String),
    /// `token_limits` was zero or negative.
    #[error("guideline {0} has a non-positive token limit")]
    NonPositiveTokenLimit(String),
    /// Registering/unregistering would leave the dependents graph
    /// inconsistent (e.g. unregistering a guideline others depend on).
    #[error("guideline {0} has unmet dependents constraint: {1}")]
    DependentsInconsistent(String, String),
}

impl Guideline {
    fn id_is_well_formed(id: &str) -> bool {
        !id.is_empty()
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    /// Validate the fields `registerGuideline` requires (spec §4.H).
    pub fn validate(&self) -> Result<(), GuidelineError> {
        if !Self::id_is_well_formed(&self.id) {
            return Err(GuidelineError::MalformedId(self.id.clone()));
        }
        if self.protocol.steps.is_empty() {
            return Err(GuidelineError::NoSteps(self.id.clone()));
        }
        for (key, prompt) in &self.prompts {
            if prompt.trim().is_empty() {
                return Err(GuidelineError::EmptyPrompt(self.id.clone(), key.clone()));
            }
        }
        if self.prompts.is_empty() {
            return Err(GuidelineError::EmptyPrompt(self.id.clone(), "*".to_string()));
        }
        if self.token_limits == 0 {
            return Err(GuidelineError::NonPositiveTokenLimit(self.id.clone()));
        }
        Ok(())
    }

    /// Parse a `Guideline` from a YAML document (SPEC_FULL §10.2).
    pub fn from_yaml_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    /// Parse a `Guideline` from a JSON document (SPEC_FULL §10.2).
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Load and parse a `Guideline` from `path` (SPEC_FULL §10.2), choosing
    /// JSON or YAML by extension (`.json` is JSON, anything else is YAML).
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, GuidelineLoadError> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path)
            .map_err(|source| GuidelineLoadError::Io { path: path.to_path_buf(), source })?;
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            Ok(Self::from_json_str(&body)?)
        } else {
            Ok(Self::from_yaml_str(&body)?)
        }
    }
}

/// Errors raised loading a `Guideline` from disk (SPEC_FULL §10.2).
#[derive(Debug, thiserror::Error)]
pub enum GuidelineLoadError {
    /// The file could not be read.
    #[error("failed to read guideline at {path}: {source}")]
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

/// Lifecycle status of a triggered `Execution`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, not yet started.
    Pending,
    /// Actively running.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// One triggered run of a guideline's protocol (spec §4.H).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Unique execution id.
    pub id: Uuid,
    /// Guideline this execution runs.
    pub guideline_id: String,
    /// Signal that triggered this execution.
    pub triggering_signal: Uuid,
    /// Current status.
    pub status: ExecutionStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Completion time, once terminal.
    pub completed_at: Option<DateTime<Utc>>,
    /// Token cost recorded on completion.
    pub token_cost: Option<u32>,
}

/// Rolling metrics for a guideline's executions (spec §4.H).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GuidelineMetrics {
    /// Total executions created.
    pub total_executions: u64,
    /// Executions that completed successfully.
    pub successful: u64,
    /// Executions that failed.
    pub failed: u64,
    /// Running average execution duration, in milliseconds.
    pub avg_duration_ms: f64,
    /// Running average token cost.
    pub avg_token_cost: f64,
    /// `successful / (successful + failed)`, `0.0` if none finished.
    pub success_rate: f64,
}

impl GuidelineMetrics {
    /// Fold in a terminal execution outcome.
    pub fn record(&mut self, success: bool, duration_ms: u64, token_cost: u32) {
        let finished_before = self.successful + self.failed;
        let duration_avg_n = finished_before as f64;
        self.avg_duration_ms =
            (self.avg_duration_ms * duration_avg_n + duration_ms as f64) / (duration_avg_n + 1.0);
        self.avg_token_cost =
            (self.avg_token_cost * duration_avg_n + token_cost as f64) / (duration_avg_n + 1.0);
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        let finished_after = self.successful + self.failed;
        self.success_rate = self.successful as f64 / finished_after as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_guideline() -> Guideline {
        Guideline {
            id: "security-review".into(),
            category: GuidelineCategory::Review,
            priority: 5,
            enabled: true,
            protocol: Protocol {
                triggers: vec![SignalKind::Vr],
                steps: vec![ProtocolStep {
                    name: "scan".into(),
                    output_type: "findings".into(),
                    decision_points: vec![],
                    success_criteria: vec!["no criticals".into()],
                    fallback_action: None,
                }],
            },
            requirements: vec!["GitHub API access".into()],
            prompts: HashMap::from([("inspector".to_string(), "scan {{diff}}".to_string())]),
            token_limits: 4_000,
            tools: vec![],
            dependencies: vec![],
        }
    }

    #[test]
    fn validate_accepts_minimal_guideline() {
        assert!(minimal_guideline().validate().is_ok());
    }

    #[test]
    fn validate_rejects_no_steps() {
        let mut g = minimal_guideline();
        g.protocol.steps.clear();
        assert!(matches!(g.validate(), Err(GuidelineError::NoSteps(_))));
    }

    #[test]
    fn validate_rejects_malformed_id() {
        let mut g = minimal_guideline();
        g.id = "bad id!".into();
        assert!(matches!(g.validate(), Err(GuidelineError::MalformedId(_))));
    }

    #[test]
    fn metrics_success_rate_tracks_finished_only() {
        let mut m = GuidelineMetrics::default();
        m.record(true, 100, 50);
        m.record(false, 200, 70);
        assert_eq!(m.successful, 1);
        assert_eq!(m.failed, 1);
        assert!((m.success_rate - 0.5).abs() < 1e-9);
    }
}
