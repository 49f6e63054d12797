#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **agentmux-bus** – Multi-channel typed pub/sub event bus.
//!
//! Generalized from `toka-bus-core::{EventBus, InMemoryBus}`
//! (`examples/scrappyAI-Toka/crates/toka-bus-core/src/lib.rs`), which used
//! a single `tokio::sync::broadcast` channel for one event type. Spec §4.B
//! needs several independently-named channels (`signals`, `agent-logs`,
//! `guidelines`, `lifecycle`) and per-subscriber isolation — a slow
//! subscriber must not stall others — so each subscription here gets its
//! own bounded mailbox and its own cooperative task, rather than sharing one
//! broadcast ring.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default per-subscriber bounded mailbox capacity (spec §5 backpressure).
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// `signals` channel: newly emitted/resolved `Signal`s.
pub const CHANNEL_SIGNALS: &str = "signals";
/// `agent-logs` channel: detected-signal and streaming lifecycle events.
pub const CHANNEL_AGENT_LOGS: &str = "agent-logs";
/// `guidelines` channel: guideline toggle/trigger/execution events.
pub const CHANNEL_GUIDELINES: &str = "guidelines";
/// `lifecycle` channel: agent session spawn/health/termination events.
pub const CHANNEL_LIFECYCLE: &str = "lifecycle";
/// `budget` channel: token allocation and compaction events.
pub const CHANNEL_BUDGET: &str = "budget";
/// `context` channel: war-room and versioned-context update events.
pub const CHANNEL_CONTEXT: &str = "context";

/// A type-erased event published on a channel. The `name` discriminates the
/// event shape (e.g. `"signal_processed"`, `"warRoom_updated"`); `payload`
/// carries whatever fields that event needs, parsed by consumers that know
/// the shape (spec §9 "Dynamic `any` payloads").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    /// Channel this event was published on.
    pub channel: String,
    /// Discriminator for the event shape.
    pub name: String,
    /// Opaque payload.
    pub payload: Value,
}

impl BusEvent {
    /// Construct a new event for `channel`/`name` with `payload`.
    pub fn new(channel: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self { channel: channel.into(), name: name.into(), payload }
    }
}

/// Opaque subscription handle returned by `subscribe`; doubles as the
/// cancellation token passed to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

struct Subscriber {
    sender: mpsc::Sender<BusEvent>,
    cancel: Arc<tokio::sync::Notify>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

/// Bus-wide delivery counters, exposed for introspection (SPEC_FULL §10.4).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BusStats {
    /// Events accepted by at least one subscriber's mailbox.
    pub delivered: u64,
    /// Events dropped because a subscriber's mailbox was full.
    pub dropped: u64,
}

/// In-memory, per-channel, per-subscriber event bus.
pub struct EventBus {
    channels: DashMap<String, DashMap<SubscriptionId, Subscriber>>,
    mailbox_capacity: usize,
    stats: Arc<AtomicU64Pair>,
}

#[derive(Default)]
struct AtomicU64Pair {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY)
    }
}

impl EventBus {
    /// Construct a bus whose subscriber mailboxes hold up to
    /// `mailbox_capacity` pending events before drops begin.
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            mailbox_capacity,
            stats: Arc::new(AtomicU64Pair::default()),
        }
    }

    /// Publish `event` to every live subscriber of `channel`.
    ///
    /// Non-blocking: a subscriber whose mailbox is full has the event
    /// dropped for it (and only it) with a backpressure warning logged;
    /// other subscribers on the same channel are unaffected.
    pub fn publish(&self, channel: &str, event: BusEvent) {
        let Some(subs) = self.channels.get(channel) else {
            return;
        };
        for entry in subs.iter() {
            match entry.value().sender.try_send(event.clone()) {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(channel, subscriber = %entry.key().0, "event bus mailbox full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Subscriber task already exited; unsubscribe() will
                    // have removed or will remove the entry.
                }
            }
        }
    }

    /// Subscribe `handler` to `channel`. `handler` runs on its own
    /// cooperative task, fed by a bounded mailbox, so a slow handler only
    /// delays delivery to itself.
    pub fn subscribe<F>(&self, channel: &str, handler: F) -> SubscriptionId
    where
        F: Fn(BusEvent) + Send + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        let (tx, mut rx) = mpsc::channel(self.mailbox_capacity);
        let notify = Arc::new(tokio::sync::Notify::new());
        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let sub = Subscriber { sender: tx, cancel: notify.clone(), cancelled: cancelled.clone() };
        self.channels
            .entry(channel.to_string())
            .or_insert_with(DashMap::new)
            .insert(id, sub);

        let channel_owned = channel.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = notify.notified() => {
                        debug!(channel = %channel_owned, subscriber = %id.0, "subscription cancelled");
                        break;
                    }
                    maybe_event = rx.recv() => {
                        match maybe_event {
                            Some(event) => handler(event),
                            None => break,
                        }
                    }
                }
                if cancelled.load(Ordering::Acquire) {
                    break;
                }
            }
        });

        id
    }

    /// Cancel a subscription. Idempotent: unsubscribing an id that is
    /// already gone (or never existed) is a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        for channel in self.channels.iter() {
            if let Some((_, sub)) = channel.value().remove(&id) {
                sub.cancelled.store(true, Ordering::Release);
                sub.cancel.notify_one();
                return;
            }
        }
    }

    /// Number of live subscribers across all channels.
    pub fn subscriber_count(&self) -> usize {
        self.channels.iter().map(|c| c.value().len()).sum()
    }

    /// Snapshot of delivery/drop counters.
    pub fn stats(&self) -> BusStats {
        BusStats {
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Stable hash of a channel name, occasionally useful for sharding/logging.
pub fn channel_fingerprint(channel: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    channel.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_delivers_to_subscriber_in_order() {
        let bus = EventBus::default();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        bus.subscribe(CHANNEL_SIGNALS, move |event| {
            received2.lock().unwrap().push(event.name);
        });

        for i in 0..5 {
            bus.publish(
                CHANNEL_SIGNALS,
                BusEvent::new(CHANNEL_SIGNALS, format!("evt-{i}"), Value::Null),
            );
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        let got = received.lock().unwrap().clone();
        assert_eq!(got, vec!["evt-0", "evt-1", "evt-2", "evt-3", "evt-4"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn slow_subscriber_does_not_block_others() {
        let bus = EventBus::new(1);
        let fast_count = Arc::new(AtomicU64::new(0));
        let fast_count2 = fast_count.clone();
        bus.subscribe(CHANNEL_AGENT_LOGS, move |_| {
            fast_count2.fetch_add(1, Ordering::Relaxed);
        });
        // Slow subscriber: never drains, so its mailbox fills after 1 event.
        let (_tx_keep_alive, _rx_never_polled) = mpsc::channel::<()>(1);
        bus.subscribe(CHANNEL_AGENT_LOGS, |_| {
            std::thread::sleep(Duration::from_millis(200));
        });

        for i in 0..10 {
            bus.publish(
                CHANNEL_AGENT_LOGS,
                BusEvent::new(CHANNEL_AGENT_LOGS, format!("evt-{i}"), Value::Null),
            );
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fast_count.load(Ordering::Relaxed) >= 5);
        assert!(bus.stats().dropped > 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::default();
        let id = bus.subscribe(CHANNEL_LIFECYCLE, |_| {});
        bus.unsubscribe(id);
        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
