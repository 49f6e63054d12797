//! Deterministic agent-selection scoring (spec §4.E item 2).

use agentmux_types::{AgentConfig, AgentSession, SessionStatus};
use chrono::{DateTime, Utc};

/// Per-period remaining-tokens floor above which an agent earns the
/// capacity bonus point (spec §4.E: "daily remaining > 1000").
const DAILY_REMAINING_BONUS_FLOOR: u64 = 1_000;

/// Score one candidate agent against a pending task's target role.
///
/// +10 if `task_type` is among the agent's `roles`; +5 if it is the
/// agent's declared best `role`; +3 if daily remaining budget exceeds
/// `DAILY_REMAINING_BONUS_FLOOR`; +2 if the agent has no running session
/// or its session is idle. A score of 0 means ineligible.
pub fn score_candidate(
    config: &AgentConfig,
    task_type: agentmux_types::AgentRole,
    daily_remaining: u64,
    session: Option<&AgentSession>,
) -> u32 {
    let mut score = 0u32;
    if config.roles.contains(&task_type) {
        score += 10;
    } else {
        return 0;
    }
    if config.role == task_type {
        score += 5;
    }
    if daily_remaining > DAILY_REMAINING_BONUS_FLOOR {
        score += 3;
    }
    let session_available = match session {
        None => true,
        Some(s) => s.status == SessionStatus::Idle,
    };
    if session_available {
        score += 2;
    }
    score
}

/// Pick the highest-scoring eligible candidate, breaking ties by earliest
/// `last_activity` (spec §4.E: "ties broken by earliest lastActivity").
/// Candidates with score 0 never win even if they're the only entry.
pub fn select_best<'a>(
    candidates: impl Iterator<Item = (&'a AgentConfig, u32, Option<DateTime<Utc>>)>,
) -> Option<&'a AgentConfig> {
    let mut best: Option<(&AgentConfig, u32, DateTime<Utc>)> = None;
    for (config, score, last_activity) in candidates {
        if score == 0 {
            continue;
        }
        let last_activity = last_activity.unwrap_or(DateTime::<Utc>::MIN_UTC);
        match &best {
            None => best = Some((config, score, last_activity)),
            Some((_, best_score, best_activity)) => {
                if score > *best_score
                    || (score == *best_score && last_activity < *best_activity)
                {
                    best = Some((config, score, last_activity));
                }
            }
        }
    }
    best.map(|(config, _, _)| config)
}
