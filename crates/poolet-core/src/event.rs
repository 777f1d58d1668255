//! Watch feed events and operator-visible diagnostics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Container, Instance};

/// One state transition observed on the watch feed.
///
/// Exactly one of the three variants is delivered per change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WatchEvent<T> {
    Added(T),
    Modified { old: T, new: T },
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Modified { .. } => "modified",
            WatchEvent::Deleted(_) => "deleted",
        }
    }

    /// The object as it is after the change
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Deleted(obj) => obj,
            WatchEvent::Modified { new, .. } => new,
        }
    }
}

impl StoreEvent {
    /// Store version at which the change happened
    pub fn resource_version(&self) -> u64 {
        match self {
            StoreEvent::Instance(e) => e.object().metadata.resource_version,
            StoreEvent::Container(e) => e.object().metadata.resource_version,
        }
    }
}

/// Event on the combined instance/container feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "event", rename_all = "lowercase")]
pub enum StoreEvent {
    Instance(WatchEvent<Instance>),
    Container(WatchEvent<Container>),
}

/// Reason recorded when no container can host an instance
pub const REASON_OUT_OF_CAPACITY: &str = "OutOfCapacity";
/// Reason recorded when a decision could not be assumed or committed
pub const REASON_CANNOT_SCHEDULE: &str = "CannotSchedule";
/// Reason recorded when a decision was committed
pub const REASON_SCHEDULED: &str = "Scheduled";

/// A fire-and-forget diagnostic about an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_uid: Option<Uuid>,
    pub subject_name: String,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(instance: &Instance, reason: &str, message: impl Into<String>) -> Self {
        Self {
            subject_uid: instance.metadata.uid,
            subject_name: instance.metadata.name.clone(),
            reason: reason.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
