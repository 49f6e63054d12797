//! Streamer configuration bundle (spec §4.C inputs).
//!
//! Shaped after `agentmux_types::AgentConfig::from_yaml_str` — a plain
//! `serde`-derived struct with a `Default` impl and a YAML-loading
//! constructor, leaving actual file I/O to the caller (spec §1 Non-goal:
//! config *file loading* is out of scope, the parsed bundle is not).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables the Log Streamer & Signal Detector is driven by (spec §4.C).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Max `LogEntry` records retained per session's ring buffer.
    pub buffer_size: usize,
    /// Lines longer than this are truncated before any other processing.
    pub max_log_line_length: usize,
    /// Whether the streamer periodically enumerates the Session Host for
    /// new/vanished sessions rather than requiring explicit `start_stream`
    /// calls.
    pub auto_discovery: bool,
    /// Poll interval for auto-discovery, in milliseconds.
    pub monitor_interval_ms: u64,
    /// Per-line detection budget; a regex pass exceeding this is abandoned
    /// for that line and logged, not retried.
    pub signal_detection_timeout_ms: u64,
    /// Grace period after a stream stops, during which its buffer is
    /// retained so pending readers can finish draining (spec §4.C
    /// teardown: "buffers retained for a grace period (default 5s)").
    pub drain_grace_ms: u64,
    /// Substrings that mark a session name as "agent-like" for
    /// auto-discovery purposes.
    pub agent_name_markers: Vec<String>,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 500,
            max_log_line_length: 2000,
            auto_discovery: true,
            monitor_interval_ms: 5_000,
            signal_detection_timeout_ms: 250,
            drain_grace_ms: 5_000,
            agent_name_markers: vec!["agent".to_string()],
        }
    }
}

impl StreamerConfig {
    /// Parse a `StreamerConfig` from a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    /// Poll interval as a `Duration`.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Per-line detection timeout as a `Duration`.
    pub fn signal_detection_timeout(&self) -> Duration {
        Duration::from_millis(self.signal_detection_timeout_ms)
    }

    /// Post-stop buffer retention window as a `Duration`.
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}
