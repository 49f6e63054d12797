//! Versioned context sections: `updateContext`/`rollbackContext`, conflict
//! resolution, subscriptions, and history compaction (spec §4.G).
//!
//! Each section is guarded by its own `tokio::sync::Mutex`, not a bus-wide
//! or registry-wide lock — generalized from
//! `toka-rule-metadata::catalogue` (`examples/scrappyAI-Toka/crates/toka-rule-metadata/src/catalogue.rs`),
//! which keys a `DashMap` of independently-lockable entries by id and
//! computes a SHA-256 `checksum` per entry the same way.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{instrument, warn};
use uuid::Uuid;

use agentmux_bus::{BusEvent, EventBus, CHANNEL_CONTEXT};
use agentmux_types::{estimate_tokens, ConflictResolution, ContextConflict, ContextSection, ContextVersion};

use crate::errors::ContextError;

/// A requested change to a context section (spec §4.G "Versioning").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextUpdate {
    /// New content, if changing. Required when creating a section.
    pub content: Option<String>,
    /// New priority, if changing.
    pub priority: Option<u32>,
    /// Replacement tag set, if changing.
    pub tags: Option<Vec<String>>,
    /// Replacement dependency list, if changing.
    pub dependencies: Option<Vec<String>>,
    /// Origin label for a newly created section. Ignored on update.
    pub source: Option<String>,
    /// Required to settle a detected `content` conflict; ignored
    /// otherwise.
    pub resolution: Option<ConflictResolution>,
}

fn checksum_of(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{digest:x}")
}

fn push_history(section: &mut ContextSection, depth: usize) {
    let snapshot = ContextVersion {
        version: section.version,
        content: section.content.clone(),
        priority: section.priority,
        checksum: checksum_of(&section.content),
        recorded_at: section.last_updated,
    };
    section.history.push(snapshot);
    if section.history.len() > depth {
        let overflow = section.history.len() - depth;
        section.history.drain(0..overflow);
    }
}

type Callback = Box<dyn Fn(&ContextSection) + Send + Sync>;

/// Registry of versioned `ContextSection`s (spec §4.G).
pub struct ContextRegistry {
    sections: DashMap<String, Arc<Mutex<ContextSection>>>,
    subscribers: DashMap<String, DashMap<Uuid, Callback>>,
    history_depth: usize,
    compaction_threshold: u32,
    bus: Arc<EventBus>,
}

impl ContextRegistry {
    /// Construct an empty registry. `history_depth` bounds per-section
    /// history (spec default 50); `compaction_threshold` is the total
    /// estimated-token ceiling that triggers history compaction.
    pub fn new(history_depth: usize, compaction_threshold: u32, bus: Arc<EventBus>) -> Self {
        Self {
            sections: DashMap::new(),
            subscribers: DashMap::new(),
            history_depth,
            compaction_threshold,
            bus,
        }
    }

    /// Current snapshot of a section, or `None` if it doesn't exist.
    pub async fn get(&self, id: &str) -> Option<ContextSection> {
        let entry = self.sections.get(id)?.clone();
        let section = entry.lock().await;
        Some(section.clone())
    }

    /// `updateContext(contextId, update)`: create, update, or (via an
    /// empty `content`) clear a section, applying conflict policy.
    #[instrument(skip(self, update))]
    pub async fn update_context(
        &self,
        id: &str,
        update: ContextUpdate,
    ) -> Result<ContextSection, ContextError> {
        let (lock, is_new) = match self.sections.entry(id.to_string()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => {
                if update.content.is_none() {
                    return Err(ContextError::MissingInitialContent(id.to_string()));
                }
                let placeholder = Arc::new(Mutex::new(ContextSection::new(id, String::new(), 0, "")));
                e.insert(placeholder.clone());
                (placeholder, true)
            }
        };
        let mut section = lock.lock().await;

        if is_new {
            let content = update.content.clone().expect("checked above");
            *section = ContextSection::new(
                id,
                content,
                update.priority.unwrap_or(0),
                update.source.clone().unwrap_or_default(),
            );
            section.tags = update.tags.clone().unwrap_or_default();
            section.dependencies = update.dependencies.clone().unwrap_or_default();
            let snapshot = section.clone();
            drop(section);
            self.notify(id, &snapshot);
            self.publish(id, "context_updated", &snapshot);
            self.maybe_compact().await;
            return Ok(snapshot);
        }

        let mut resolved_content = section.content.clone();
        let mut content_changed = false;
        let mut saw_conflict: Option<ContextConflict> = None;

        if let Some(incoming) = &update.content {
            if *incoming != section.content {
                // Any differing content checksum relative to the latest
                // version is itself a content conflict (spec §4.G) —
                // requires an explicit resolution, regardless of what the
                // caller believes it started from.
                saw_conflict = Some(ContextConflict::Content);
                match update.resolution {
                    None => {
                        return Err(ContextError::ConflictRequiresResolution(
                            id.to_string(),
                            ContextConflict::Content,
                        ))
                    }
                    Some(ConflictResolution::Accept) => {
                        resolved_content = incoming.clone();
                        content_changed = true;
                    }
                    Some(ConflictResolution::Reject) => {
                        // keep current content; record the conflict only.
                    }
                    Some(ConflictResolution::Merge) => {
                        resolved_content = format!("{}\n---\n{}", section.content, incoming);
                        content_changed = true;
                    }
                }
            }
        }

        let mut resolved_priority = section.priority;
        if let Some(incoming_priority) = update.priority {
            if incoming_priority != section.priority {
                saw_conflict.get_or_insert(ContextConflict::Priority);
                // Priority conflicts always auto-merge: max wins.
                resolved_priority = resolved_priority.max(incoming_priority);
            }
        }

        let priority_changed = resolved_priority != section.priority;
        let tags_changed = update.tags.as_ref().is_some_and(|t| *t != section.tags);
        let deps_changed =
            update.dependencies.as_ref().is_some_and(|d| *d != section.dependencies);

        if !content_changed && !priority_changed && !tags_changed && !deps_changed {
            let snapshot = section.clone();
            if let Some(conflict) = saw_conflict {
                warn!(context_id = id, ?conflict, "conflict recorded with no net change");
            }
            return Ok(snapshot);
        }

        push_history(&mut section, self.history_depth);
        section.version += 1;
        section.content = resolved_content;
        section.priority = resolved_priority;
        if let Some(tags) = update.tags {
            section.tags = tags;
        }
        if let Some(deps) = update.dependencies {
            section.dependencies = deps;
        }
        section.tokens = estimate_tokens(&section.content);
        section.last_updated = Utc::now();

        let snapshot = section.clone();
        drop(section);
        self.notify(id, &snapshot);
        self.publish(id, "context_updated", &snapshot);
        self.maybe_compact().await;
        Ok(snapshot)
    }

    /// `rollbackContext(contextId, version)`: replace current content and
    /// priority with the retained history entry for `version`, bumping
    /// the version counter (a rollback is itself a new version, not a
    /// rewind of the counter).
    #[instrument(skip(self))]
    pub async fn rollback_context(
        &self,
        id: &str,
        version: u64,
    ) -> Result<ContextSection, ContextError> {
        let lock = self
            .sections
            .get(id)
            .ok_or_else(|| ContextError::UnknownSection(id.to_string()))?
            .clone();
        let mut section = lock.lock().await;
        let target = section
            .history
            .iter()
            .find(|v| v.version == version)
            .cloned()
            .ok_or_else(|| ContextError::UnknownVersion(id.to_string(), version))?;

        push_history(&mut section, self.history_depth);
        section.version += 1;
        section.content = target.content;
        section.priority = target.priority;
        section.tokens = estimate_tokens(&section.content);
        section.last_updated = Utc::now();

        let snapshot = section.clone();
        drop(section);
        self.notify(id, &snapshot);
        self.publish(id, "context_rolled_back", &snapshot);
        Ok(snapshot)
    }

    /// `subscribeToContextUpdates(contextId, callback)`: `callback` runs
    /// synchronously on every applied update to `contextId`. A panicking
    /// callback is isolated and does not affect other subscribers.
    pub fn subscribe(&self, id: &str, callback: impl Fn(&ContextSection) + Send + Sync + 'static) -> Uuid {
        let sub_id = Uuid::new_v4();
        self.subscribers
            .entry(id.to_string())
            .or_insert_with(DashMap::new)
            .insert(sub_id, Box::new(callback));
        sub_id
    }

    /// Cancel a subscription. Idempotent.
    pub fn unsubscribe(&self, id: &str, sub_id: Uuid) {
        if let Some(subs) = self.subscribers.get(id) {
            subs.remove(&sub_id);
        }
    }

    fn notify(&self, id: &str, section: &ContextSection) {
        let Some(subs) = self.subscribers.get(id) else {
            return;
        };
        for entry in subs.iter() {
            let callback = entry.value();
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(section))).is_err() {
                warn!(context_id = id, subscriber = %entry.key(), "context subscriber callback panicked");
            }
        }
    }

    fn publish(&self, id: &str, name: &str, section: &ContextSection) {
        self.bus.publish(
            CHANNEL_CONTEXT,
            BusEvent::new(
                CHANNEL_CONTEXT,
                name,
                serde_json::json!({ "contextId": id, "version": section.version }),
            ),
        );
    }

    fn total_estimated_tokens(&self) -> u32 {
        self.sections
            .iter()
            .map(|entry| {
                // Best-effort, lock-free estimate for the compaction
                // trigger: try_lock so a section mid-update this instant
                // is simply skipped for one pass rather than blocking.
                entry
                    .value()
                    .try_lock()
                    .map(|s| {
                        let history_tokens: u32 =
                            s.history.iter().map(|v| estimate_tokens(&v.content)).sum();
                        s.tokens.saturating_add(history_tokens)
                    })
                    .unwrap_or(0)
            })
            .sum()
    }

    /// Compaction pass (spec §4.G "Compaction trigger"): when the total
    /// estimated token cost across all sections and their bounded
    /// histories exceeds the configured threshold, shorten the oldest
    /// history entries (in the sections with the longest histories
    /// first) until back under threshold or nothing left to trim.
    pub async fn maybe_compact(&self) {
        if self.total_estimated_tokens() <= self.compaction_threshold {
            return;
        }
        let mut candidates: Vec<(String, usize)> = self
            .sections
            .iter()
            .filter_map(|e| e.value().try_lock().ok().map(|s| (e.key().clone(), s.history.len())))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        for (id, _) in candidates {
            if self.total_estimated_tokens() <= self.compaction_threshold {
                break;
            }
            if let Some(entry) = self.sections.get(&id) {
                let mut section = entry.value().lock().await;
                if let Some(oldest) = section.history.first_mut() {
                    const TAIL_CHARS: usize = 200;
                    if oldest.content.len() > TAIL_CHARS {
                        oldest.content.truncate(TAIL_CHARS);
                    } else if section.history.len() > 1 {
                        section.history.remove(0);
                    }
                }
            }
        }
    }

    /// Snapshot of all section ids currently registered, for
    /// introspection (SPEC_FULL §10.4).
    pub fn section_ids(&self) -> Vec<String> {
        self.sections.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ContextRegistry {
        ContextRegistry::new(3, 1_000_000, Arc::new(EventBus::default()))
    }

    #[tokio::test]
    async fn create_then_unconditional_update_bumps_version_and_history() {
        let reg = registry();
        let created = reg
            .update_context(
                "prp-1",
                ContextUpdate { content: Some("v1".into()), source: Some("scanner".into()), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(created.version, 1);
        assert!(created.history.is_empty());

        let updated = reg
            .update_context(
                "prp-1",
                ContextUpdate {
                    content: Some("v2".into()),
                    resolution: Some(ConflictResolution::Accept),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.content, "v2");
        assert_eq!(updated.history.len(), 1);
        assert_eq!(updated.history[0].content, "v1");
    }

    #[tokio::test]
    async fn differing_content_requires_resolution() {
        let reg = registry();
        reg.update_context("s", ContextUpdate { content: Some("a".into()), ..Default::default() })
            .await
            .unwrap();

        let err = reg
            .update_context("s", ContextUpdate { content: Some("b".into()), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::ConflictRequiresResolution(_, ContextConflict::Content)));
    }

    #[tokio::test]
    async fn merge_resolution_concatenates_content() {
        let reg = registry();
        reg.update_context("s", ContextUpdate { content: Some("a".into()), ..Default::default() })
            .await
            .unwrap();
        reg.update_context(
            "s",
            ContextUpdate {
                content: Some("b".into()),
                resolution: Some(ConflictResolution::Accept),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let merged = reg
            .update_context(
                "s",
                ContextUpdate {
                    content: Some("c".into()),
                    resolution: Some(ConflictResolution::Merge),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(merged.content, "b\n---\nc");
    }

    #[tokio::test]
    async fn differing_priority_auto_merges_to_max() {
        let reg = registry();
        reg.update_context(
            "s",
            ContextUpdate { content: Some("a".into()), priority: Some(3), ..Default::default() },
        )
        .await
        .unwrap();
        let updated = reg
            .update_context("s", ContextUpdate { priority: Some(1), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(updated.priority, 3, "lower incoming priority must not win");
    }

    #[tokio::test]
    async fn history_is_bounded_at_configured_depth() {
        let reg = registry();
        reg.update_context("s", ContextUpdate { content: Some("v0".into()), ..Default::default() })
            .await
            .unwrap();
        for i in 1..=5 {
            reg.update_context(
                "s",
                ContextUpdate {
                    content: Some(format!("v{i}")),
                    resolution: Some(ConflictResolution::Accept),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }
        let section = reg.get("s").await.unwrap();
        assert!(section.history.len() <= 3);
    }

    #[tokio::test]
    async fn rollback_restores_historical_content_as_new_version() {
        let reg = registry();
        reg.update_context("s", ContextUpdate { content: Some("v1".into()), ..Default::default() })
            .await
            .unwrap();
        reg.update_context(
            "s",
            ContextUpdate {
                content: Some("v2".into()),
                resolution: Some(ConflictResolution::Accept),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let rolled = reg.rollback_context("s", 1).await.unwrap();
        assert_eq!(rolled.content, "v1");
        assert_eq!(rolled.version, 3, "rollback advances the version, it does not rewind it");
    }

    #[tokio::test]
    async fn rollback_to_unknown_version_errors() {
        let reg = registry();
        reg.update_context("s", ContextUpdate { content: Some("v1".into()), ..Default::default() })
            .await
            .unwrap();
        let err = reg.rollback_context("s", 99).await.unwrap_err();
        assert!(matches!(err, ContextError::UnknownVersion(_, 99)));
    }

    #[tokio::test]
    async fn subscriber_panic_does_not_block_other_subscribers() {
        let reg = registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        reg.subscribe("s", |_section| panic!("boom"));
        reg.subscribe("s", move |section| {
            let seen = seen2.clone();
            let version = section.version;
            tokio::spawn(async move {
                seen.lock().await.push(version);
            });
        });
        reg.update_context("s", ContextUpdate { content: Some("v1".into()), ..Default::default() })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().await, vec![1]);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let reg = registry();
        let id = reg.subscribe("s", |_| {});
        reg.unsubscribe("s", id);
        reg.unsubscribe("s", id);
    }
}
