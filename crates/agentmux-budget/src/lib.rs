#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **agentmux-budget** – Dynamic Token Distributor (spec §4.F).
//!
//! Computes a deterministic per-request `TokenBudget` from the fixed
//! baseline in spec §3, scaled by complexity and active-agent count, then
//! compresses it when the total would exceed the target model's context
//! window — reducing an ordered list of elastic slots by at most 70% each
//! until the overflow is absorbed, never taking a slot below 30% of its
//! pre-compression value.
//!
//! The running-metrics idiom (recompute from inputs, no hidden state)
//! mirrors `toka-llm-gateway::GatewayMetrics`
//! (`examples/scrappyAI-Toka/crates/toka-llm-gateway/src/metrics.rs`):
//! every allocation is a pure function of its inputs, so the same inputs
//! always produce the same `TokenBudget` (spec §4.F "Determinism").

use serde::{Deserialize, Serialize};
use tracing::info;

use agentmux_bus::{BusEvent, EventBus, CHANNEL_BUDGET};
use agentmux_types::{Complexity, TokenBudget};

/// Fixed inspector-output allocation (spec §3).
pub const FIXED_INSPECTOR_OUTPUT: u32 = 40_000;
/// Fixed agents-manifest allocation (spec §3).
pub const FIXED_AGENTS_MANIFEST: u32 = 20_000;
/// Base `prpContent` allocation before complexity scaling (spec §3).
pub const PRP_CONTENT_BASE: u32 = 30_000;
/// `sharedWarzone` allocation per active agent (spec §3: "10 000 ×
/// activeAgents").
pub const SHARED_WARZONE_PER_AGENT: u32 = 10_000;
/// Base `userMessages` allocation before the active-agents multiplier
/// (spec §3/§4.F; exact base unspecified by spec, decided here — see
/// DESIGN.md).
pub const USER_MESSAGES_BASE: u32 = 20_000;
/// Base `toolCalls` allocation before the activeAgents × complexity
/// scaling (spec §4.F: "Tool slot scales by activeAgents × complexity";
/// exact base unspecified by spec, decided here — see DESIGN.md).
pub const TOOL_CALLS_BASE: u32 = 5_000;

/// Active-agent count at and beyond which the `userMessages` multiplier
/// saturates at its cap (spec §4.F: "up to ×2.0 at 5+ agents").
const USER_MESSAGES_SATURATION_AGENTS: u32 = 5;
/// Cap on the `userMessages` active-agents multiplier.
const USER_MESSAGES_MULTIPLIER_CAP: f64 = 2.0;
/// Maximum fraction of a compressible slot's pre-compression value that a
/// single compression pass may remove (spec §4.F).
const MAX_REDUCTION_FRACTION: f64 = 0.7;

/// Inputs to one allocation computation (spec §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetInputs {
    /// Number of currently active agents.
    pub active_agents: u32,
    /// Target model's context window, in tokens.
    pub model_window: u32,
    /// Complexity classification of the pending signal.
    pub complexity: Complexity,
}

/// Per-slot before/after delta recorded when compression runs
/// (spec §4.F: "Emit a `compaction_applied` event with per-slot deltas").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotDelta {
    /// Slot name, matching `TokenBudget`'s field names.
    pub slot: &'static str,
    /// Allocation before this compression pass.
    pub before: u32,
    /// Allocation after this compression pass.
    pub after: u32,
}

/// Result of `allocate`: the final budget, and — when compression ran —
/// the per-slot deltas that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Final per-slot token budget; `budget.total() <= inputs.model_window`
    /// always holds.
    pub budget: TokenBudget,
    /// Empty when no compression was necessary.
    pub deltas: Vec<SlotDelta>,
}

/// Multiplier applied to `userMessages`: linear from ×1.0 at a single
/// active agent up to the ×2.0 cap at
/// `USER_MESSAGES_SATURATION_AGENTS` or more.
fn user_messages_multiplier(active_agents: u32) -> f64 {
    let agents = active_agents.max(1) as f64;
    let span = (USER_MESSAGES_SATURATION_AGENTS - 1) as f64;
    let progress = (agents - 1.0) / span;
    (1.0 + progress * (USER_MESSAGES_MULTIPLIER_CAP - 1.0)).min(USER_MESSAGES_MULTIPLIER_CAP)
}

/// Compute the pre-compression baseline allocation (spec §4.F
/// "Allocation").
fn baseline(inputs: &BudgetInputs) -> TokenBudget {
    let complexity_scale = inputs.complexity.scale();
    let agents = inputs.active_agents.max(1) as f64;

    let prp_content = (PRP_CONTENT_BASE as f64 * complexity_scale).round() as u32;
    let shared_warzone = SHARED_WARZONE_PER_AGENT.saturating_mul(inputs.active_agents.max(1));
    let user_messages =
        (USER_MESSAGES_BASE as f64 * user_messages_multiplier(inputs.active_agents)).round() as u32;
    let tool_calls = (TOOL_CALLS_BASE as f64 * agents * complexity_scale).round() as u32;
    let cot_reasoning = inputs.complexity.cot_reasoning_base();

    TokenBudget {
        inspector_output: FIXED_INSPECTOR_OUTPUT,
        agents_manifest: FIXED_AGENTS_MANIFEST,
        prp_content,
        shared_warzone,
        user_messages,
        tool_calls,
        cot_reasoning,
        safety_buffer: 0,
    }
}

/// Compute the final `Allocation` for `inputs`, compressing and publishing
/// a `compaction_applied` event on `bus` if the baseline exceeds the
/// model window.
pub fn allocate(inputs: BudgetInputs, bus: &EventBus) -> Allocation {
    let mut budget = baseline(&inputs);
    let window = inputs.model_window as u64;
    let total = budget.total();

    if total <= window {
        budget.safety_buffer = (window - total) as u32;
        return Allocation { budget, deltas: Vec::new() };
    }

    let mut overflow = (total - window) as i64;
    let mut deltas = Vec::new();

    for slot in compressible_slots() {
        if overflow <= 0 {
            break;
        }
        let current = slot.get(&budget);
        let max_reduction = (current as f64 * MAX_REDUCTION_FRACTION).floor() as u32;
        let reduction = max_reduction.min(overflow as u32);
        if reduction == 0 {
            continue;
        }
        let after = current - reduction;
        slot.set(&mut budget, after);
        deltas.push(SlotDelta { slot: slot.name(), before: current, after });
        overflow -= reduction as i64;
    }

    let new_total = budget.total();
    budget.safety_buffer = window.saturating_sub(new_total) as u32;

    if !deltas.is_empty() {
        info!(?deltas, remaining_overflow = overflow, "token budget compaction applied");
        bus.publish(
            CHANNEL_BUDGET,
            BusEvent::new(
                CHANNEL_BUDGET,
                "compaction_applied",
                serde_json::json!({ "deltas": deltas, "remainingOverflow": overflow.max(0) }),
            ),
        );
    }

    Allocation { budget, deltas }
}

/// A compressible slot, in the fixed reduction order (spec §4.F:
/// "userMessages → prpContent → sharedWarzone → cotReasoning →
/// toolCalls").
#[derive(Clone, Copy)]
struct CompressibleSlot {
    name: &'static str,
    get: fn(&TokenBudget) -> u32,
    set: fn(&mut TokenBudget, u32),
}

impl CompressibleSlot {
    fn name(&self) -> &'static str {
        self.name
    }
    fn get(&self, budget: &TokenBudget) -> u32 {
        (self.get)(budget)
    }
    fn set(&self, budget: &mut TokenBudget, value: u32) {
        (self.set)(budget, value)
    }
}

fn compressible_slots() -> [CompressibleSlot; 5] {
    [
        CompressibleSlot {
            name: "userMessages",
            get: |b| b.user_messages,
            set: |b, v| b.user_messages = v,
        },
        CompressibleSlot {
            name: "prpContent",
            get: |b| b.prp_content,
            set: |b, v| b.prp_content = v,
        },
        CompressibleSlot {
            name: "sharedWarzone",
            get: |b| b.shared_warzone,
            set: |b, v| b.shared_warzone = v,
        },
        CompressibleSlot {
            name: "cotReasoning",
            get: |b| b.cot_reasoning,
            set: |b, v| b.cot_reasoning = v,
        },
        CompressibleSlot {
            name: "toolCalls",
            get: |b| b.tool_calls,
            set: |b, v| b.tool_calls = v,
        },
    ]
}
