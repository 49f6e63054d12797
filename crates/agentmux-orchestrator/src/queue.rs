//! Priority signal queue (spec §4.I item 1, §5 "strict priority; within
//! equal priority, FIFO by enqueue time").
//!
//! A `BinaryHeap` ordered first by `Signal::priority`, then by an
//! ever-increasing enqueue sequence number (earlier sequence wins ties) —
//! the standard `Reverse`-free way to fold FIFO-within-a-bucket into a
//! single total order a `BinaryHeap` can use directly. Async callers wait
//! on a `tokio::sync::Notify`, the same wait-for-work idiom
//! `agentmux-bus::EventBus::subscribe` uses for its per-subscriber
//! mailbox loop.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio::sync::{Mutex, Notify};

use agentmux_types::Signal;

struct QueuedSignal {
    signal: Signal,
    sequence: u64,
}

impl PartialEq for QueuedSignal {
    fn eq(&self, other: &Self) -> bool {
        self.signal.priority == other.signal.priority && self.sequence == other.sequence
    }
}
impl Eq for QueuedSignal {}

impl PartialOrd for QueuedSignal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedSignal {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority pops first; among equal priorities, the lower
        // (earlier) sequence number pops first — BinaryHeap is a max-heap,
        // so reverse the sequence comparison.
        self.signal
            .priority
            .cmp(&other.signal.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Priority-ordered intake queue for `Signal`s awaiting orchestrator
/// attention.
pub struct SignalQueue {
    heap: Mutex<BinaryHeap<QueuedSignal>>,
    notify: Notify,
    sequence: AtomicU64,
}

impl SignalQueue {
    /// Construct an empty queue.
    pub fn new() -> Self {
        Self { heap: Mutex::new(BinaryHeap::new()), notify: Notify::new(), sequence: AtomicU64::new(0) }
    }

    /// Enqueue `signal`, waking one waiting `dequeue` if any.
    pub async fn enqueue(&self, signal: Signal) {
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        let mut heap = self.heap.lock().await;
        heap.push(QueuedSignal { signal, sequence });
        drop(heap);
        self.notify.notify_one();
    }

    /// Wait for and pop the highest-priority signal, blocking until one is
    /// available.
    pub async fn dequeue(&self) -> Signal {
        loop {
            {
                let mut heap = self.heap.lock().await;
                if let Some(queued) = heap.pop() {
                    return queued.signal;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Pop the highest-priority signal if one is queued, without waiting.
    pub async fn try_dequeue(&self) -> Option<Signal> {
        let mut heap = self.heap.lock().await;
        heap.pop().map(|queued| queued.signal)
    }

    /// Number of signals currently queued.
    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }
}

impl Default for SignalQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn signal(priority: u8, source: &str) -> Signal {
        Signal::new(agentmux_types::SignalKind::Tp, priority, source, HashMap::new()).unwrap()
    }

    #[tokio::test]
    async fn strict_priority_before_fifo() {
        let queue = SignalQueue::new();
        queue.enqueue(signal(5, "a")).await;
        queue.enqueue(signal(9, "b")).await;
        queue.enqueue(signal(5, "c")).await;

        assert_eq!(queue.dequeue().await.source, "b");
        assert_eq!(queue.dequeue().await.source, "a");
        assert_eq!(queue.dequeue().await.source, "c");
    }

    #[tokio::test]
    async fn dequeue_waits_for_enqueue() {
        let queue = std::sync::Arc::new(SignalQueue::new());
        let waiter = queue.clone();
        let handle = tokio::spawn(async move { waiter.dequeue().await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.enqueue(signal(3, "late")).await;

        let got = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("dequeue resolved")
            .unwrap();
        assert_eq!(got.source, "late");
    }

    #[tokio::test]
    async fn try_dequeue_drains_without_blocking() {
        let queue = SignalQueue::new();
        assert!(queue.try_dequeue().await.is_none());
        queue.enqueue(signal(1, "x")).await;
        assert!(queue.try_dequeue().await.is_some());
        assert!(queue.try_dequeue().await.is_none());
    }
}
