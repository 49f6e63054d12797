//! Versioned context section record (spec §3, §4.G).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of prior versions retained per section.
pub const DEFAULT_HISTORY_DEPTH: usize = 50;

/// A single snapshot of a context section's content, retained in a
/// section's bounded history for rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextVersion {
    /// Monotone version number this snapshot was current at.
    pub version: u64,
    /// Content at this version.
    pub content: String,
    /// Priority at this version.
    pub priority: u32,
    /// SHA-256 hex checksum of `content`, used for conflict detection.
    pub checksum: String,
    /// When this version became current.
    pub recorded_at: DateTime<Utc>,
}

/// A named, versioned prompt-context section (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    /// Stable section identifier.
    pub id: String,
    /// Current content.
    pub content: String,
    /// Current priority (higher wins automatic priority-conflict merges).
    pub priority: u32,
    /// Estimated token cost: `ceil(len(content) / 4)`.
    pub tokens: u32,
    /// Monotone version counter, incremented on every applied update.
    pub version: u64,
    /// Last time this section was updated.
    pub last_updated: DateTime<Utc>,
    /// Free-form classification tags.
    pub tags: Vec<String>,
    /// Ids of other sections this one depends on.
    pub dependencies: Vec<String>,
    /// Origin label (e.g. which guideline or agent produced it).
    pub source: String,
    /// Bounded history of prior versions, oldest first, capped at
    /// `DEFAULT_HISTORY_DEPTH` (or a configured depth).
    pub history: Vec<ContextVersion>,
}

/// Estimate a section's token cost the way spec §3 defines it:
/// `ceil(len / 4)`.
pub fn estimate_tokens(content: &str) -> u32 {
    ((content.len() as u64 + 3) / 4) as u32
}

impl ContextSection {
    /// Construct a new section at version 1 with an empty history.
    pub fn new(id: impl Into<String>, content: impl Into<String>, priority: u32, source: impl Into<String>) -> Self {
        let content = content.into();
        let tokens = estimate_tokens(&content);
        Self {
            id: id.into(),
            content,
            priority,
            tokens,
            version: 1,
            last_updated: Utc::now(),
            tags: Vec::new(),
            dependencies: Vec::new(),
            source: source.into(),
            history: Vec::new(),
        }
    }
}

/// A detected conflict on update (spec §4.G "Conflict resolution").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContextConflict {
    /// Incoming content's checksum differs from the latest version's.
    Content,
    /// Incoming priority differs from the latest version's.
    Priority,
}

/// How a `Content` conflict should be resolved (priority conflicts are
/// always auto-merged and never reach this type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the incoming content, discarding current.
    Accept,
    /// Keep current content, discarding incoming.
    Reject,
    /// Concatenate current and incoming content with a delimiter.
    Merge,
}
