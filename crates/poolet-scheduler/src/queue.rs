//! Deduplicating FIFO of instances awaiting a reconcile

use std::collections::{HashSet, VecDeque};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

#[derive(Default)]
struct QueueState {
    order: VecDeque<Uuid>,
    pending: HashSet<Uuid>,
}

/// Work queue feeding the reconcile worker.
///
/// An instance is held at most once; adding it again while it waits is a no-op.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `uid`; returns false if it was already waiting
    pub async fn add(&self, uid: Uuid) -> bool {
        let mut state = self.state.lock().await;
        if !state.pending.insert(uid) {
            return false;
        }
        state.order.push_back(uid);
        drop(state);

        self.notify.notify_one();
        true
    }

    /// Take the next instance without waiting
    pub async fn try_next(&self) -> Option<Uuid> {
        let mut state = self.state.lock().await;
        let uid = state.order.pop_front()?;
        state.pending.remove(&uid);
        Some(uid)
    }

    /// Wait for the next instance
    pub async fn next(&self) -> Uuid {
        loop {
            if let Some(uid) = self.try_next().await {
                return uid;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.order.is_empty()
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.order.clear();
        state.pending.clear();
    }
}
