//! Bounded outbox for deferred dispatch while the service is degraded.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::warn;

use contex_core::defaults::OUTBOX_CAPACITY;
use contex_core::ContextNode;

use crate::dispatcher::PublishNotification;

/// A publish whose index writes and fan-out were deferred.
///
/// Nodes carry their computed embeddings so draining needs no model calls.
#[derive(Debug, Clone)]
pub struct DeferredPublish {
    pub nodes: Vec<ContextNode>,
    pub notification: PublishNotification,
}

/// In-memory buffer of publishes awaiting index writes and dispatch.
///
/// Publishes succeed while the matcher or index is unhealthy; their
/// downstream work is parked here and drained on recovery. On overflow the
/// oldest entry is dropped; affected agents recover via `read(since)`, and
/// the index is reconciled from the log.
pub struct Outbox {
    inner: Mutex<VecDeque<DeferredPublish>>,
    capacity: usize,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Park a deferred publish. Returns `false` if an older entry was
    /// evicted to make room.
    pub fn push(&self, deferred: DeferredPublish) -> bool {
        let mut queue = self.inner.lock().unwrap();
        queue.push_back(deferred);
        if queue.len() > self.capacity {
            queue.pop_front();
            warn!(
                subsystem = "dispatch",
                component = "outbox",
                capacity = self.capacity,
                "Outbox overflow, oldest deferred publish dropped"
            );
            false
        } else {
            true
        }
    }

    /// Take everything currently parked, in arrival order.
    pub fn drain(&self) -> Vec<DeferredPublish> {
        self.inner.lock().unwrap().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(OUTBOX_CAPACITY)
    }
}
