//! Per-key work queue.
//!
//! Level-triggered dispatch with the three guarantees the reconcilers rely
//! on: a key is never delivered while a pass for it is in flight, a
//! notification during an in-flight pass marks the key dirty and redelivers
//! it after the pass completes, and duplicate notifications for a queued key
//! collapse into one delivery. Deletions cancel the in-flight pass through
//! the key's cancellation token.

use resource_store::ObjectKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    /// Delivered to the channel, waiting for a worker
    Queued,
    /// A pass is in flight; `dirty` records notifications received meanwhile
    Running { dirty: bool },
}

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<ObjectKey, KeyState>,
    cancels: HashMap<ObjectKey, CancellationToken>,
}

/// Deduplicating per-key queue feeding the worker pool.
#[derive(Debug)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<ObjectKey>,
    inner: Mutex<Inner>,
}

impl WorkQueue {
    /// Creates the queue and the single consumer endpoint for the dispatch
    /// loop.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ObjectKey>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                inner: Mutex::new(Inner::default()),
            }),
            rx,
        )
    }

    /// Notifies the queue that a key needs reconciling.
    pub fn enqueue(&self, key: ObjectKey) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        match inner.states.get_mut(&key) {
            None => {
                inner.states.insert(key.clone(), KeyState::Queued);
                let _ = self.tx.send(key);
            }
            Some(KeyState::Queued) => {}
            Some(KeyState::Running { dirty }) => *dirty = true,
        }
    }

    /// Marks a delivered key as running and returns its cancellation token.
    pub fn begin(&self, key: &ObjectKey) -> CancellationToken {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner
            .states
            .insert(key.clone(), KeyState::Running { dirty: false });
        let token = CancellationToken::new();
        inner.cancels.insert(key.clone(), token.clone());
        token
    }

    /// Completes a pass; a key dirtied during the pass is redelivered.
    pub fn finish(&self, key: &ObjectKey) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.cancels.remove(key);
        if inner.states.remove(key) == Some(KeyState::Running { dirty: true }) {
            inner.states.insert(key.clone(), KeyState::Queued);
            let _ = self.tx.send(key.clone());
        }
    }

    /// Cancels the in-flight pass for a key (object deleted).
    pub fn cancel(&self, key: &ObjectKey) {
        let inner = self.inner.lock().expect("queue lock poisoned");
        if let Some(token) = inner.cancels.get(key) {
            token.cancel();
        }
    }
}
