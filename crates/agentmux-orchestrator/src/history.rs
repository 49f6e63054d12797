//! Bounded processing history (spec §4.I item 5, §5 backpressure:
//! "processing history (default 1000; older trimmed to 500 on
//! overflow)").

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Default capacity before a trim runs.
pub const DEFAULT_CAPACITY: usize = 1000;
/// Size a trim reduces the history back down to.
pub const TRIM_TARGET: usize = 500;

/// One entry in the orchestrator's decision history (spec §4.I item 5:
/// `{signalId, timestamp, tokenUsage, durationMs, success}`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProcessingRecord {
    /// The signal this record was produced for.
    pub signal_id: Uuid,
    /// When processing completed.
    pub timestamp: DateTime<Utc>,
    /// Tokens consumed dispatching this signal.
    pub token_usage: u64,
    /// Wall-clock processing duration.
    pub duration_ms: u64,
    /// Whether the outcome was a success.
    pub success: bool,
}

/// Bounded, oldest-first ring of `ProcessingRecord`s.
pub struct ProcessingHistory {
    entries: Mutex<VecDeque<ProcessingRecord>>,
}

impl ProcessingHistory {
    /// Construct an empty history.
    pub fn new() -> Self {
        Self { entries: Mutex::new(VecDeque::new()) }
    }

    /// Append `record`, trimming down to `TRIM_TARGET` if the history has
    /// grown past `DEFAULT_CAPACITY`.
    pub async fn record(&self, record: ProcessingRecord) {
        let mut entries = self.entries.lock().await;
        entries.push_back(record);
        if entries.len() > DEFAULT_CAPACITY {
            let excess = entries.len() - TRIM_TARGET;
            entries.drain(0..excess);
        }
    }

    /// The `n` most recent records, oldest first.
    pub async fn recent(&self, n: usize) -> Vec<ProcessingRecord> {
        let entries = self.entries.lock().await;
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).copied().collect()
    }

    /// Total records currently retained.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for ProcessingHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(success: bool) -> ProcessingRecord {
        ProcessingRecord {
            signal_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            token_usage: 10,
            duration_ms: 5,
            success,
        }
    }

    #[tokio::test]
    async fn overflow_trims_to_target_not_to_empty() {
        let history = ProcessingHistory::new();
        for _ in 0..(DEFAULT_CAPACITY + 1) {
            history.record(record(true)).await;
        }
        assert_eq!(history.len().await, TRIM_TARGET);
    }

    #[tokio::test]
    async fn recent_returns_oldest_first_within_the_window() {
        let history = ProcessingHistory::new();
        for i in 0..5 {
            let mut r = record(true);
            r.duration_ms = i;
            history.record(r).await;
        }
        let last_three = history.recent(3).await;
        assert_eq!(last_three.iter().map(|r| r.duration_ms).collect::<Vec<_>>(), vec![2, 3, 4]);
    }
}
