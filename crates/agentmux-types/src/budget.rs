//! Token budget slot layout (spec §3, §4.F).

use serde::{Deserialize, Serialize};

/// Complexity classification of a pending signal, driving elastic-slot
/// scaling (spec §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// Small payload, few correlated prior signals.
    Low,
    /// Default case.
    Medium,
    /// Large payload or many correlated prior signals in the trailing
    /// 60-second window.
    High,
}

impl Complexity {
    /// Multiplicative scale applied to most elastic slots (spec §4.F).
    pub fn scale(self) -> f64 {
        match self {
            Complexity::Low => 0.7,
            Complexity::Medium => 1.0,
            Complexity::High => 1.5,
        }
    }

    /// Base `cotReasoning` allocation for this complexity (spec §3).
    pub fn cot_reasoning_base(self) -> u32 {
        match self {
            Complexity::Low => 5_000,
            Complexity::Medium => 10_000,
            Complexity::High => 20_000,
        }
    }
}

/// Per-invocation token allocation across fixed and elastic prompt
/// sections (spec §3). All fields are token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Fixed: inspector output section.
    pub inspector_output: u32,
    /// Fixed: agents manifest section.
    pub agents_manifest: u32,
    /// Elastic: PRP content section.
    pub prp_content: u32,
    /// Elastic: shared war-room/context section.
    pub shared_warzone: u32,
    /// Elastic: user message history section.
    pub user_messages: u32,
    /// Elastic: tool-call budget.
    pub tool_calls: u32,
    /// Elastic: chain-of-thought reasoning budget.
    pub cot_reasoning: u32,
    /// Whatever remains after the other slots are assigned.
    pub safety_buffer: u32,
}

impl TokenBudget {
    /// Sum of every slot (spec §3 hard invariant: `total() <= modelWindow`).
    pub fn total(&self) -> u64 {
        self.inspector_output as u64
            + self.agents_manifest as u64
            + self.prp_content as u64
            + self.shared_warzone as u64
            + self.user_messages as u64
            + self.tool_calls as u64
            + self.cot_reasoning as u64
            + self.safety_buffer as u64
    }
}
