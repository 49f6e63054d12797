//! Complexity fingerprint of recent signals (spec §4.I item 2: "fingerprint
//! of prior signals for complexity classification").
//!
//! Spec leaves the exact classification rule unstated beyond "fingerprint
//! of prior signals"; this crate decides it from a trailing window of
//! recently-observed `SignalKind`s — the more distinct kinds and the more
//! high-priority (error/attention-class) kinds seen recently, the higher
//! the classification (see DESIGN.md).

use std::collections::{HashSet, VecDeque};

use tokio::sync::Mutex;

use agentmux_types::{Complexity, SignalCatalog, SignalKind};

/// Default trailing-window size (spec default unstated; decided here).
pub const DEFAULT_WINDOW: usize = 20;
/// `SignalCatalog` priority at and above which a kind counts as
/// "high-priority" for complexity purposes.
const HIGH_PRIORITY_FLOOR: u8 = 7;

/// Rolling window of recently-observed signal kinds, used to classify the
/// complexity of the signal currently being processed.
pub struct ComplexityFingerprint {
    recent: Mutex<VecDeque<SignalKind>>,
    window: usize,
}

impl ComplexityFingerprint {
    /// Construct a fingerprint tracking the last `window` observed kinds.
    pub fn new(window: usize) -> Self {
        Self { recent: Mutex::new(VecDeque::with_capacity(window)), window }
    }

    /// Record that `kind` was just processed.
    pub async fn observe(&self, kind: SignalKind) {
        let mut recent = self.recent.lock().await;
        recent.push_back(kind);
        if recent.len() > self.window {
            recent.pop_front();
        }
    }

    /// Classify complexity from the current window.
    pub async fn classify(&self) -> Complexity {
        let recent = self.recent.lock().await;
        let distinct: HashSet<SignalKind> = recent.iter().copied().collect();
        let high_priority_count =
            recent.iter().filter(|k| SignalCatalog::priority_of(**k) >= HIGH_PRIORITY_FLOOR).count();

        if high_priority_count >= 2 || distinct.len() >= 5 {
            Complexity::High
        } else if high_priority_count >= 1 || distinct.len() >= 3 {
            Complexity::Medium
        } else {
            Complexity::Low
        }
    }
}

impl Default for ComplexityFingerprint {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_window_is_low_complexity() {
        let fp = ComplexityFingerprint::default();
        assert_eq!(fp.classify().await, Complexity::Low);
    }

    #[tokio::test]
    async fn repeated_fatal_kind_escalates_to_high() {
        let fp = ComplexityFingerprint::default();
        fp.observe(SignalKind::FfFatal).await;
        fp.observe(SignalKind::Bb).await;
        assert_eq!(fp.classify().await, Complexity::High);
    }

    #[tokio::test]
    async fn window_is_bounded_and_forgets_old_kinds() {
        let fp = ComplexityFingerprint::new(2);
        fp.observe(SignalKind::FfFatal).await;
        fp.observe(SignalKind::Tp).await;
        fp.observe(SignalKind::Tp).await;
        // FfFatal has aged out of the 2-wide window.
        assert_eq!(fp.classify().await, Complexity::Low);
    }
}
