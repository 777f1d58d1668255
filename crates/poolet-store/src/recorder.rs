//! In-memory diagnostics log

use async_trait::async_trait;
use poolet_core::{Diagnostic, REASON_SCHEDULED};
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::traits::EventRecorder;

/// Bounded ring buffer of the most recent diagnostics
pub struct EventLog {
    capacity: usize,
    entries: RwLock<VecDeque<Diagnostic>>,
}

impl EventLog {
    /// Create a log keeping at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::new()),
        }
    }

    /// Most recent entries first
    pub async fn list(&self, limit: usize) -> Vec<Diagnostic> {
        let entries = self.entries.read().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Entries about one instance, most recent first
    pub async fn for_instance(&self, uid: Uuid) -> Vec<Diagnostic> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .rev()
            .filter(|d| d.subject_uid == Some(uid))
            .cloned()
            .collect()
    }

    /// Number of entries with the given reason
    pub async fn count_reason(&self, reason: &str) -> usize {
        let entries = self.entries.read().await;
        entries.iter().filter(|d| d.reason == reason).count()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(512)
    }
}

#[async_trait]
impl EventRecorder for EventLog {
    async fn record(&self, diagnostic: Diagnostic) {
        if diagnostic.reason == REASON_SCHEDULED {
            info!(
                instance = %diagnostic.subject_name,
                reason = %diagnostic.reason,
                "{}",
                diagnostic.message
            );
        } else {
            warn!(
                instance = %diagnostic.subject_name,
                reason = %diagnostic.reason,
                "{}",
                diagnostic.message
            );
        }

        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(diagnostic);
    }
}
