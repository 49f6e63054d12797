//! The five-section war-room memo record (spec §3, §4.G).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default per-section item cap.
pub const DEFAULT_MAX_ITEMS: usize = 50;

/// One of the five named war-room sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarRoomSection {
    /// Finished work.
    Done,
    /// Work currently underway.
    Doing,
    /// Queued, not-yet-started work.
    Next,
    /// Obstacles preventing progress.
    Blockers,
    /// Free-form observations.
    Notes,
}

impl WarRoomSection {
    /// All five sections, in the canonical display order.
    pub const ALL: [WarRoomSection; 5] = [
        WarRoomSection::Done,
        WarRoomSection::Doing,
        WarRoomSection::Next,
        WarRoomSection::Blockers,
        WarRoomSection::Notes,
    ];
}

/// A single entry in a war-room section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarRoomItem {
    /// Free text content.
    pub text: String,
    /// Insertion time.
    pub inserted_at: DateTime<Utc>,
}

impl WarRoomItem {
    /// Construct a new item timestamped `now`.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), inserted_at: Utc::now() }
    }
}

/// Read-only snapshot of the whole memo, returned by
/// `ContextManager::war_room_status` (spec §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarRoomSnapshot {
    /// Items in each section, keyed by section.
    pub sections: Vec<(WarRoomSection, Vec<WarRoomItem>)>,
    /// Total item count across all sections.
    pub total_items: usize,
    /// Description of the most recent mutating action.
    pub last_action: Option<String>,
    /// Time of the most recent mutating action.
    pub last_updated: Option<DateTime<Utc>>,
    /// Per-section item cap in effect.
    pub max_items: usize,
}
