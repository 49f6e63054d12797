//! Error-rate tracking for degraded mode (spec §4.I failure policy:
//! "if `failedDecisions / totalDecisions > configured threshold` over a
//! trailing window, the orchestrator refuses new non-fatal work").
//!
//! Spec leaves the exact threshold and window size unstated; the defaults
//! below are decided here (see DESIGN.md).

use std::collections::VecDeque;

use tokio::sync::Mutex;

/// Default trailing-window size, in decisions.
pub const DEFAULT_WINDOW: usize = 50;
/// Default failure-ratio threshold that trips degraded mode.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Sliding window of recent decision outcomes (`true` = success), used to
/// compute `failedDecisions / totalDecisions` over the trailing window.
pub struct ErrorRateTracker {
    outcomes: Mutex<VecDeque<bool>>,
    window: usize,
    threshold: f64,
}

impl ErrorRateTracker {
    /// Construct a tracker over the last `window` decisions, tripping
    /// degraded mode once the failure ratio exceeds `threshold`.
    pub fn new(window: usize, threshold: f64) -> Self {
        Self { outcomes: Mutex::new(VecDeque::with_capacity(window)), window, threshold }
    }

    /// Record one decision's outcome and return whether the tracker is now
    /// (still) in a degraded state.
    pub async fn record(&self, success: bool) -> bool {
        let mut outcomes = self.outcomes.lock().await;
        outcomes.push_back(success);
        if outcomes.len() > self.window {
            outcomes.pop_front();
        }
        failure_ratio(&outcomes) > self.threshold
    }

    /// Current degraded state without recording a new decision.
    pub async fn is_degraded(&self) -> bool {
        let outcomes = self.outcomes.lock().await;
        failure_ratio(&outcomes) > self.threshold
    }
}

fn failure_ratio(outcomes: &VecDeque<bool>) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    let failed = outcomes.iter().filter(|success| !**success).count() as f64;
    failed / outcomes.len() as f64
}

impl Default for ErrorRateTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_THRESHOLD)
    }
}
