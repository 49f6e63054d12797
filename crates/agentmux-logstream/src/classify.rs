//! Deterministic keyword-based log-level heuristic (spec §4.C step 2).
//!
//! "Later rules do not override earlier matches" — implemented as an
//! ordered list of `(keywords, level)` checked top to bottom, returning on
//! the first hit, falling back to `Debug`.

use agentmux_types::LogLevel;

const RULES: &[(&[&str], LogLevel)] = &[
    (&["fatal", "critical", "panic"], LogLevel::Critical),
    (&["error", "err:", "exception", "failed"], LogLevel::Error),
    (&["warn", "warning", "deprecated"], LogLevel::Warn),
    (&["info", "starting", "completed"], LogLevel::Info),
];

/// Classify a single (already-truncated) log line.
pub fn classify_level(line: &str) -> LogLevel {
    let lower = line.to_ascii_lowercase();
    for (keywords, level) in RULES {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return *level;
        }
    }
    LogLevel::Debug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_keyword_wins_even_with_later_matching_words() {
        assert_eq!(classify_level("fatal: error starting up"), LogLevel::Critical);
    }

    #[test]
    fn plain_line_is_debug() {
        assert_eq!(classify_level("just chatting"), LogLevel::Debug);
    }

    #[test]
    fn warn_keyword_detected() {
        assert_eq!(classify_level("WARNING: disk almost full"), LogLevel::Warn);
    }
}
