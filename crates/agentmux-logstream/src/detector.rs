//! Signal-token regex detection, confidence scoring, and context extraction
//! (spec §4.C step 3).

use once_cell::sync::Lazy;
use regex::Regex;

use agentmux_types::{SignalCatalog, SignalKind, SignalPriority};

/// Matches a bracketed signal token, e.g. `[tp]` or `[FF]`. Case is
/// significant: lowercase and uppercase tokens are distinct kinds
/// (`SignalKind::from_token` already encodes this).
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([A-Za-z]{2})\]").unwrap());

/// Characters that, if seen within 100 chars after a match, add +0.1
/// confidence (spec §4.C step 3).
const FOLLOW_MARKERS: [char; 3] = ['-', ':', '|'];

/// Substrings that, if present anywhere on the line, add +0.1 confidence.
const PRP_MARKERS: [&str; 3] = ["PRP-", "##", "> "];

/// Half-width (in chars) of the context window extracted around a match.
const CONTEXT_RADIUS: usize = 50;

/// Window size (in chars) searched after a match for a follow marker.
const FOLLOW_WINDOW: usize = 100;

/// A detected signal token occurrence within a single log line.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Recognized signal kind.
    pub kind: SignalKind,
    /// Catalog priority for `kind`.
    pub priority: SignalPriority,
    /// Base 0.8, +0.1 per matched heuristic, capped at 1.0.
    pub confidence: f64,
    /// `±CONTEXT_RADIUS` chars of surrounding text.
    pub context: String,
}

/// Run every registered signal regex over `line`, returning one `Detection`
/// per recognized token in left-to-right match order.
pub fn detect(line: &str) -> Vec<Detection> {
    let chars: Vec<char> = line.chars().collect();
    let mut out = Vec::new();

    for m in TOKEN_RE.find_iter(line) {
        let token = &line[m.start() + 1..m.end() - 1];
        let Some(kind) = SignalKind::from_token(token) else {
            continue;
        };

        let char_start = line[..m.start()].chars().count();
        let char_end = line[..m.end()].chars().count();

        let mut confidence: f64 = 0.8;
        let follow_end = (char_end + FOLLOW_WINDOW).min(chars.len());
        if chars[char_end..follow_end].iter().any(|c| FOLLOW_MARKERS.contains(c)) {
            confidence += 0.1;
        }
        if PRP_MARKERS.iter().any(|marker| line.contains(marker)) {
            confidence += 0.1;
        }
        confidence = confidence.min(1.0);

        let ctx_start = char_start.saturating_sub(CONTEXT_RADIUS);
        let ctx_end = (char_end + CONTEXT_RADIUS).min(chars.len());
        let context: String = chars[ctx_start..ctx_end].iter().collect();

        out.push(Detection { kind, priority: SignalCatalog::priority_of(kind), confidence, context });
    }

    out
}
