//! Log entry and level types shared by the Log Streamer (spec §3, §4.C).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signal::SignalKind;

/// Severity assigned to a log line by the detector's keyword heuristic.
/// Ordered from least to most severe for convenience comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Verbose, non-actionable detail.
    Debug,
    /// Normal operational output.
    Info,
    /// Recoverable anomaly.
    Warn,
    /// Operation failed.
    Error,
    /// Fatal/unrecoverable condition.
    Critical,
}

/// A single line observed from an agent session's output (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique id, assigned at ingestion time.
    pub id: u64,
    /// Observation time.
    pub timestamp: DateTime<Utc>,
    /// Heuristically classified severity.
    pub level: LogLevel,
    /// Line content, truncated to the configured cap.
    pub content: String,
    /// Signal kinds detected on this line, in match order.
    pub detected_signals: Vec<SignalKind>,
}
