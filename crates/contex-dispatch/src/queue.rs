//! Bounded per-agent delivery queue.
//!
//! Updates are held in sequence order and consumed by a single worker, which
//! gives each agent strictly ascending delivery sequences. On overflow the
//! oldest update is dropped; the agent's `last_seen_sequence` stays behind,
//! so it catches up via the event stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use contex_core::DataUpdate;

/// Bounded FIFO of pending updates for one agent.
pub struct DeliveryQueue {
    inner: Mutex<VecDeque<DataUpdate>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue an update, keeping the queue ordered by sequence.
    ///
    /// Returns `false` when the oldest pending update had to be dropped to
    /// make room.
    pub fn push(&self, update: DataUpdate) -> bool {
        let mut queue = self.inner.lock().unwrap();

        // Inserts are nearly always at the tail; the scan only runs when
        // concurrent publishes commit out of order.
        let position = queue
            .iter()
            .rposition(|queued| queued.sequence <= update.sequence)
            .map(|i| i + 1)
            .unwrap_or(0);
        queue.insert(position, update);

        let mut overflowed = false;
        while queue.len() > self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            overflowed = true;
        }
        drop(queue);

        self.notify.notify_one();
        !overflowed
    }

    /// Wait for the next update. Returns `None` once the queue is closed and
    /// drained.
    pub async fn recv(&self) -> Option<DataUpdate> {
        loop {
            if let Some(update) = self.inner.lock().unwrap().pop_front() {
                return Some(update);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue; the worker drains what remains and exits.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Updates dropped to overflow since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
