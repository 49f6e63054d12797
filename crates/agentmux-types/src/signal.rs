//! Canonical signal kinds, priorities, and the immutable `Signal` envelope.
//!
//! Generalized from `toka-types::Operation` / `toka-bus-core::KernelEvent`
//! (`examples/scrappyAI-Toka/crates/toka-types/src/lib.rs`): a closed,
//! serializable enumeration sitting at the bottom of the crate graph, with
//! constructors that validate rather than `Default`-fill invalid state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Maximum length of a signal's free-form `source` label.
pub const MAX_SOURCE_LEN: usize = 256;

/// Two-character signal tokens observed on agent log lines (spec §6), plus
/// the synthetic kinds the orchestrator itself produces (escalation,
/// degraded-mode). Unknown tokens are ignored by the detector rather than
/// rejected here — this enum only names tokens the catalog recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types, missing_docs)]
pub enum SignalKind {
    // Progress / state codes
    Tp,
    Dp,
    Tw,
    Bf,
    Cq,
    Tg,
    Cp,
    Cf,
    Rv,
    Ra,
    Rl,
    Mg,
    // Attention codes
    Aa,
    Oa,
    Ic,
    // Failures / errors
    Ff,
    /// Uppercase `[FF]` — distinct from lowercase `[ff]`; reserved for fatal
    /// system/process failures (see `SignalCatalog::priority_of`).
    FfFatal,
    Bb,
    Er,
    Tr,
    // Review / reply
    Rc,
    Af,
    Vr,
    Iv,
    Rp,
    /// Synthesized by the Orchestrator Core when no eligible agent exists or
    /// a fatal-class signal short-circuits normal dispatch (spec §4.I).
    Escalation,
    /// Synthesized when the error-rate threshold trips degraded mode
    /// (spec §4.I failure policy).
    DegradedMode,
}

impl SignalKind {
    /// Parse the canonical two-character bracket token, e.g. `"tp"` or
    /// `"FF"`. Returns `None` for anything not in the catalog — the caller
    /// (the log detector) treats that as "ignore".
    pub fn from_token(token: &str) -> Option<Self> {
        use SignalKind::*;
        Some(match token {
            "tp" => Tp,
            "dp" => Dp,
            "tw" => Tw,
            "bf" => Bf,
            "cq" => Cq,
            "tg" => Tg,
            "cp" => Cp,
            "cf" => Cf,
            "rv" => Rv,
            "ra" => Ra,
            "rl" => Rl,
            "mg" => Mg,
            "aa" => Aa,
            "oa" => Oa,
            "ic" => Ic,
            "ff" => Ff,
            "FF" => FfFatal,
            "bb" => Bb,
            "er" => Er,
            "tr" => Tr,
            "rc" => Rc,
            "af" => Af,
            "vr" => Vr,
            "iv" => Iv,
            "rp" => Rp,
            _ => return None,
        })
    }

    /// The canonical bracket token for this kind, inverse of `from_token`
    /// for every kind that can appear on a log line (the two synthetic
    /// kinds have no token and return `None`).
    pub fn token(&self) -> Option<&'static str> {
        use SignalKind::*;
        Some(match self {
            Tp => "tp",
            Dp => "dp",
            Tw => "tw",
            Bf => "bf",
            Cq => "cq",
            Tg => "tg",
            Cp => "cp",
            Cf => "cf",
            Rv => "rv",
            Ra => "ra",
            Rl => "rl",
            Mg => "mg",
            Aa => "aa",
            Oa => "oa",
            Ic => "ic",
            Ff => "ff",
            FfFatal => "FF",
            Bb => "bb",
            Er => "er",
            Tr => "tr",
            Rc => "rc",
            Af => "af",
            Vr => "vr",
            Iv => "iv",
            Rp => "rp",
            Escalation | DegradedMode => return None,
        })
    }

    /// `true` for the fatal class that short-circuits normal dispatch
    /// (spec §4.I failure policy, §7 error table).
    pub fn is_fatal(&self) -> bool {
        matches!(self, SignalKind::FfFatal)
    }
}

/// Lifecycle state of a `Signal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalState {
    /// The signal has not yet been resolved or expired.
    Active,
    /// A follow-up signal with `reply_to` set to this signal's id exists.
    Resolved,
    /// The signal aged out without resolution.
    Expired,
}

/// Priority on the 1 (lowest) – 10 (fatal) scale used for queue ordering.
pub type SignalPriority = u8;

/// Immutable signal envelope (spec §3).
///
/// Fields never change after construction; a state transition is expressed
/// by emitting a *new* `Signal` whose `reply_to` points at the original —
/// enforced here by `Signal::reply` rather than by any mutator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique identifier.
    pub id: Uuid,
    /// Canonical kind, used for catalog lookups and guideline triggers.
    pub kind: SignalKind,
    /// 1 (lowest) – 10 (fatal) ordering priority.
    pub priority: SignalPriority,
    /// Free-form origin label, e.g. `"agent:a1"` or `"scanner:prp"`.
    pub source: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Opaque payload; interpreted per-kind by consumers that know the
    /// shape (e.g. the log detector stores `context`/`confidence` here).
    pub payload: HashMap<String, Value>,
    /// The signal this one replies to, if any.
    pub reply_to: Option<Uuid>,
    /// Current lifecycle state.
    pub state: SignalState,
}

/// Errors raised while constructing a `Signal`.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// `source` was empty or exceeded `MAX_SOURCE_LEN`.
    #[error("invalid signal source: {0}")]
    InvalidSource(String),
}

impl Signal {
    /// Construct a new, active signal with a fresh id and the current
    /// timestamp.
    pub fn new(
        kind: SignalKind,
        priority: SignalPriority,
        source: impl Into<String>,
        payload: HashMap<String, Value>,
    ) -> Result<Self, SignalError> {
        let source = source.into();
        if source.is_empty() || source.len() > MAX_SOURCE_LEN {
            return Err(SignalError::InvalidSource(source));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            source,
            timestamp: Utc::now(),
            payload,
            reply_to: None,
            state: SignalState::Active,
        })
    }

    /// Produce the resolution signal: a new envelope with `reply_to` set to
    /// `self.id` and state `Resolved`. `self` itself is never mutated — the
    /// caller is responsible for recording both the original and the reply.
    pub fn reply(&self, state: SignalState, payload: HashMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: self.kind,
            priority: self.priority,
            source: self.source.clone(),
            timestamp: Utc::now(),
            payload,
            reply_to: Some(self.id),
            state,
        }
    }
}

/// Where a signal kind is expected to originate from, used for confidence
/// scoring in the log detector (spec §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Detected from an agent's log/terminal output.
    AgentLog,
    /// Produced by an external scanner (code/log/git/PRP).
    Scanner,
    /// Produced directly by a user action.
    User,
}

/// Central, total catalog mapping every declared `SignalKind` to its
/// default priority and expected provenance (spec §4.A).
///
/// The map is total: `priority_of`/`provenance_of` exhaustively match every
/// variant, so adding a new `SignalKind` without updating this module fails
/// to compile rather than silently defaulting.
#[derive(Debug, Clone)]
pub struct SignalCatalog;

impl SignalCatalog {
    /// Default priority for `kind`. Partial list from spec §4.A:
    /// fatal system/process failures = 10; PR/approval requests and
    /// orchestrator attention = 8; test-run failures = 7; progress
    /// markers = 5; informational = 3. The remaining codes are slotted
    /// into the same bands by the class they belong to in spec §6.
    pub fn priority_of(kind: SignalKind) -> SignalPriority {
        use SignalKind::*;
        match kind {
            FfFatal => 10,
            Bb => 9,
            Aa | Oa | Af => 8,
            Er | Tr | Ff => 7,
            Cf | Vr | Iv | Rp => 6,
            Tp | Dp | Tw | Bf | Cq | Tg | Cp | Rv | Ra | Rl | Mg => 5,
            Rc | Ic => 3,
            Escalation => 10,
            DegradedMode => 9,
        }
    }

    /// Expected provenance for `kind`, used to adjust confidence scoring in
    /// the log detector.
    pub fn provenance_of(kind: SignalKind) -> Provenance {
        use SignalKind::*;
        match kind {
            Escalation | DegradedMode => Provenance::User,
            _ => Provenance::AgentLog,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_total_and_matches_spec_examples() {
        assert_eq!(SignalCatalog::priority_of(SignalKind::FfFatal), 10);
        assert_eq!(SignalCatalog::priority_of(SignalKind::Bb), 9);
        assert_eq!(SignalCatalog::priority_of(SignalKind::Dp), 5);
        assert_eq!(SignalCatalog::priority_of(SignalKind::Ic), 3);
    }

    #[test]
    fn token_roundtrip() {
        for tok in ["tp", "bb", "FF", "af", "rp"] {
            let kind = SignalKind::from_token(tok).unwrap();
            assert_eq!(kind.token(), Some(tok));
        }
        assert!(SignalKind::from_token("zz").is_none());
    }

    #[test]
    fn reply_preserves_identity_and_links_back() {
        let s = Signal::new(SignalKind::Bb, 9, "agent:a1", HashMap::new()).unwrap();
        let r = s.reply(SignalState::Resolved, HashMap::new());
        assert_eq!(r.reply_to, Some(s.id));
        assert_ne!(r.id, s.id);
        assert_eq!(r.kind, s.kind);
    }

    #[test]
    fn rejects_empty_source() {
        assert!(Signal::new(SignalKind::Tp, 5, "", HashMap::new()).is_err());
    }
}
