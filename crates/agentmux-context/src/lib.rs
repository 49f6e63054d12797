#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **agentmux-context** – Context Manager: war-room memo and versioned
//! context sections (spec §4.G).
//!
//! Two independent structures share this crate because they share a
//! channel (`agentmux-bus::CHANNEL_CONTEXT`) and a caller (the
//! orchestrator's "assemble execution context" step, spec §4.I item 2)
//! but have unrelated concurrency shapes: the war-room memo is one
//! whole-structure lock (spec §5: "no interleaving between an add and a
//! move on the same section"), while versioned sections are
//! independently lockable per id. Splitting them into `warroom` and
//! `versioned` keeps that distinction explicit rather than forcing one
//! lock discipline on both.

pub mod errors;
pub mod versioned;
pub mod warroom;

use std::sync::Arc;

use uuid::Uuid;

use agentmux_bus::EventBus;
use agentmux_types::{ContextSection, WarRoomSection, WarRoomSnapshot};

pub use errors::ContextError;
pub use versioned::ContextUpdate;

/// Tuning knobs for a `ContextManager` (spec §3 defaults).
#[derive(Debug, Clone, Copy)]
pub struct ContextManagerConfig {
    /// Per-section war-room item cap (spec default 50).
    pub war_room_max_items: usize,
    /// Per-section context version-history depth (spec default 50).
    pub history_depth: usize,
    /// Total estimated-token ceiling that triggers history compaction.
    pub compaction_threshold: u32,
}

impl Default for ContextManagerConfig {
    fn default() -> Self {
        Self {
            war_room_max_items: agentmux_types::warroom::DEFAULT_MAX_ITEMS,
            history_depth: agentmux_types::context::DEFAULT_HISTORY_DEPTH,
            compaction_threshold: 200_000,
        }
    }
}

/// Facade over the war-room memo and the versioned context registry
/// (spec §4.G).
pub struct ContextManager {
    war_room: warroom::WarRoomMemo,
    sections: versioned::ContextRegistry,
}

impl ContextManager {
    /// Construct a manager with `config`, publishing events on `bus`.
    pub fn new(config: ContextManagerConfig, bus: Arc<EventBus>) -> Self {
        Self {
            war_room: warroom::WarRoomMemo::new(config.war_room_max_items, bus.clone()),
            sections: versioned::ContextRegistry::new(
                config.history_depth,
                config.compaction_threshold,
                bus,
            ),
        }
    }

    /// `addToWarRoom(section, item)`.
    pub async fn add_to_war_room(&self, section: WarRoomSection, text: impl Into<String>) {
        self.war_room.add(section, text).await;
    }

    /// `moveInWarRoom(fromSection, toSection, item)`.
    pub async fn move_in_war_room(
        &self,
        from: WarRoomSection,
        to: WarRoomSection,
        item: &str,
    ) -> bool {
        self.war_room.move_item(from, to, item).await
    }

    /// `archiveWarRoomItems(olderThanDays)`.
    pub async fn archive_war_room_items(&self, older_than_days: i64) -> usize {
        self.war_room.archive_older_than(older_than_days).await
    }

    /// `getWarRoomStatus()`.
    pub async fn war_room_status(&self) -> WarRoomSnapshot {
        self.war_room.status().await
    }

    /// `updateContext(contextId, update)`.
    pub async fn update_context(
        &self,
        context_id: &str,
        update: ContextUpdate,
    ) -> Result<ContextSection, ContextError> {
        self.sections.update_context(context_id, update).await
    }

    /// `rollbackContext(contextId, version)`.
    pub async fn rollback_context(
        &self,
        context_id: &str,
        version: u64,
    ) -> Result<ContextSection, ContextError> {
        self.sections.rollback_context(context_id, version).await
    }

    /// Current snapshot of a versioned section, if it exists.
    pub async fn context_section(&self, context_id: &str) -> Option<ContextSection> {
        self.sections.get(context_id).await
    }

    /// `subscribeToContextUpdates(contextId, callback)`.
    pub fn subscribe_to_context_updates(
        &self,
        context_id: &str,
        callback: impl Fn(&ContextSection) + Send + Sync + 'static,
    ) -> Uuid {
        self.sections.subscribe(context_id, callback)
    }

    /// `unsubscribe(id)`.
    pub fn unsubscribe_from_context_updates(&self, context_id: &str, subscription: Uuid) {
        self.sections.unsubscribe(context_id, subscription);
    }

    /// Ids of every versioned section currently registered
    /// (SPEC_FULL §10.4 metrics-snapshot surface).
    pub fn context_section_ids(&self) -> Vec<String> {
        self.sections.section_ids()
    }

    /// Run one best-effort compaction pass over the versioned sections
    /// (spec §4.G "Compaction trigger"). Exposed so a caller (the
    /// orchestrator's periodic background tick) can run it independently
    /// of any particular `update_context` call.
    pub async fn compact(&self) {
        self.sections.maybe_compact().await;
    }
}
