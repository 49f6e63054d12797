//! Five-section bounded war-room memo (spec §4.G).
//!
//! Mirrors `toka-orchestration::monitor::ProgressMonitor`'s single-lock
//! state machine (`examples/scrappyAI-Toka/crates/toka-orchestration/src/monitor.rs`):
//! one `tokio::sync::RwLock` guards the whole memo so that, per spec §5,
//! "an add and a move on the same section" never interleave — there is
//! exactly one writer lock for the entire structure, not one per section.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::instrument;

use agentmux_bus::{BusEvent, EventBus, CHANNEL_CONTEXT};
use agentmux_types::{WarRoomItem, WarRoomSection, WarRoomSnapshot};

struct WarRoomInner {
    sections: HashMap<WarRoomSection, VecDeque<WarRoomItem>>,
    last_action: Option<String>,
    last_updated: Option<DateTime<Utc>>,
}

impl WarRoomInner {
    fn empty() -> Self {
        let mut sections = HashMap::new();
        for s in WarRoomSection::ALL {
            sections.insert(s, VecDeque::new());
        }
        Self { sections, last_action: None, last_updated: None }
    }

    fn touch(&mut self, action: impl Into<String>) {
        self.last_action = Some(action.into());
        self.last_updated = Some(Utc::now());
    }
}

/// The five-section memo: `addToWarRoom`/`moveInWarRoom`/
/// `archiveWarRoomItems`/`getWarRoomStatus` (spec §4.G).
pub struct WarRoomMemo {
    inner: RwLock<WarRoomInner>,
    max_items: usize,
    bus: Arc<EventBus>,
}

impl WarRoomMemo {
    /// Construct an empty memo with a per-section cap of `max_items`,
    /// publishing transition events on `bus`.
    pub fn new(max_items: usize, bus: Arc<EventBus>) -> Self {
        Self { inner: RwLock::new(WarRoomInner::empty()), max_items, bus }
    }

    /// `addToWarRoom(section, item)`: enqueue `text`; if the section now
    /// exceeds `maxItems`, the oldest entry is evicted. Emits
    /// `warRoom_updated`.
    #[instrument(skip(self, text))]
    pub async fn add(&self, section: WarRoomSection, text: impl Into<String>) {
        let item = WarRoomItem::new(text);
        let mut inner = self.inner.write().await;
        let bucket = inner.sections.entry(section).or_default();
        bucket.push_back(item);
        let evicted = bucket.len() > self.max_items;
        if evicted {
            bucket.pop_front();
        }
        inner.touch(format!("add:{section:?}"));
        drop(inner);
        self.publish_updated(section);
    }

    /// `moveInWarRoom(fromSection, toSection, item)`: atomically removes
    /// the first entry in `from` whose text equals `item`, and inserts it
    /// (as a fresh entry, subject to `to`'s cap) into `to`. Returns `false`
    /// and mutates nothing if no matching entry exists.
    #[instrument(skip(self, item))]
    pub async fn move_item(
        &self,
        from: WarRoomSection,
        to: WarRoomSection,
        item: &str,
    ) -> bool {
        let mut inner = self.inner.write().await;
        let found = {
            let from_bucket = inner.sections.entry(from).or_default();
            let pos = from_bucket.iter().position(|i| i.text == item);
            pos.map(|p| from_bucket.remove(p).expect("position came from this deque"))
        };
        let Some(_removed) = found else {
            return false;
        };
        let moved = WarRoomItem::new(item);
        let to_bucket = inner.sections.entry(to).or_default();
        to_bucket.push_back(moved);
        if to_bucket.len() > self.max_items {
            to_bucket.pop_front();
        }
        inner.touch(format!("move:{from:?}->{to:?}"));
        drop(inner);
        self.publish_updated(to);
        true
    }

    /// `archiveWarRoomItems(olderThanDays)`: removes every entry older
    /// than the cutoff across all sections, returning the removed count.
    /// Emits `warRoom_archived`.
    #[instrument(skip(self))]
    pub async fn archive_older_than(&self, older_than_days: i64) -> usize {
        let cutoff = Duration::days(older_than_days);
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let mut removed = 0usize;
        for bucket in inner.sections.values_mut() {
            let before = bucket.len();
            bucket.retain(|item| now - item.inserted_at <= cutoff);
            removed += before - bucket.len();
        }
        if removed > 0 {
            inner.touch(format!("archive:{removed}"));
        }
        drop(inner);
        if removed > 0 {
            self.bus.publish(
                CHANNEL_CONTEXT,
                BusEvent::new(
                    CHANNEL_CONTEXT,
                    "warRoom_archived",
                    serde_json::json!({ "removed": removed, "olderThanDays": older_than_days }),
                ),
            );
        }
        removed
    }

    /// `getWarRoomStatus()`: a read-only copy of every section, totals,
    /// and the most recent mutating action.
    pub async fn status(&self) -> WarRoomSnapshot {
        let inner = self.inner.read().await;
        let sections: Vec<(WarRoomSection, Vec<WarRoomItem>)> = WarRoomSection::ALL
            .into_iter()
            .map(|s| {
                let items = inner.sections.get(&s).cloned().unwrap_or_default();
                (s, items.into_iter().collect())
            })
            .collect();
        let total_items = sections.iter().map(|(_, items)| items.len()).sum();
        WarRoomSnapshot {
            sections,
            total_items,
            last_action: inner.last_action.clone(),
            last_updated: inner.last_updated,
            max_items: self.max_items,
        }
    }

    fn publish_updated(&self, section: WarRoomSection) {
        self.bus.publish(
            CHANNEL_CONTEXT,
            BusEvent::new(
                CHANNEL_CONTEXT,
                "warRoom_updated",
                serde_json::json!({ "section": section }),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memo(max_items: usize) -> WarRoomMemo {
        WarRoomMemo::new(max_items, Arc::new(EventBus::default()))
    }

    #[tokio::test]
    async fn add_beyond_cap_evicts_oldest() {
        let m = memo(2);
        m.add(WarRoomSection::Next, "a").await;
        m.add(WarRoomSection::Next, "b").await;
        m.add(WarRoomSection::Next, "c").await;
        let status = m.status().await;
        let next = status.sections.iter().find(|(s, _)| *s == WarRoomSection::Next).unwrap();
        let texts: Vec<&str> = next.1.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn move_then_move_matches_direct_add_and_clears_origin() {
        let m1 = memo(50);
        m1.add(WarRoomSection::Next, "X").await;
        m1.add(WarRoomSection::Next, "Y").await;
        assert!(m1.move_item(WarRoomSection::Next, WarRoomSection::Doing, "X").await);

        let m2 = memo(50);
        m2.add(WarRoomSection::Next, "Y").await;
        m2.add(WarRoomSection::Doing, "X").await;

        let s1 = m1.status().await;
        let s2 = m2.status().await;
        let extract = |snap: &WarRoomSnapshot, sec: WarRoomSection| -> Vec<String> {
            snap.sections.iter().find(|(s, _)| *s == sec).unwrap().1.iter().map(|i| i.text.clone()).collect()
        };
        assert_eq!(extract(&s1, WarRoomSection::Next), extract(&s2, WarRoomSection::Next));
        assert_eq!(extract(&s1, WarRoomSection::Doing), extract(&s2, WarRoomSection::Doing));
        assert!(!extract(&s1, WarRoomSection::Next).contains(&"X".to_string()));
    }

    #[tokio::test]
    async fn move_absent_item_returns_false_and_mutates_nothing() {
        let m = memo(50);
        m.add(WarRoomSection::Next, "X").await;
        let before = m.status().await.total_items;
        assert!(!m.move_item(WarRoomSection::Next, WarRoomSection::Doing, "absent").await);
        assert_eq!(m.status().await.total_items, before);
    }

    #[tokio::test]
    async fn war_room_transition_scenario() {
        let m = memo(50);
        m.add(WarRoomSection::Next, "X").await;
        m.add(WarRoomSection::Next, "Y").await;
        m.move_item(WarRoomSection::Next, WarRoomSection::Doing, "X").await;
        m.move_item(WarRoomSection::Doing, WarRoomSection::Done, "X").await;

        let status = m.status().await;
        let extract = |sec: WarRoomSection| -> Vec<String> {
            status.sections.iter().find(|(s, _)| *s == sec).unwrap().1.iter().map(|i| i.text.clone()).collect()
        };
        assert_eq!(extract(WarRoomSection::Done), vec!["X".to_string()]);
        assert!(extract(WarRoomSection::Doing).is_empty());
        assert_eq!(extract(WarRoomSection::Next), vec!["Y".to_string()]);
        assert_eq!(status.total_items, 2);

        let removed = m.archive_older_than(0).await;
        assert_eq!(removed, 2);
        assert_eq!(m.status().await.total_items, 0);
    }
}
