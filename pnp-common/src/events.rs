//! Notification intent types
//!
//! A notification intent is a side-effect record produced on qualifying state
//! transitions. It is not persisted by this pipeline; a bounded channel hands
//! it to a downstream emitter, applying backpressure to workers when full.

use crate::crn::Crn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Which record kind the intent concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Incident,
    Maintenance,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Incident => "incident",
            EventKind::Maintenance => "maintenance",
        }
    }
}

/// What changed about the record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeDescriptor {
    /// First successful insert of a publishable record
    Inserted,
    /// Tombstoned record became publishable again
    Restored,
    /// Update changed user-visible fields
    FieldsChanged {
        short_description: bool,
        state: bool,
        crns: bool,
    },
}

/// Side-effect record consumed by the downstream notification emitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub kind: EventKind,
    pub record_id: String,
    pub change: ChangeDescriptor,
    pub crns: Vec<Crn>,
    pub timestamp: DateTime<Utc>,
}

/// Sender half of the bounded notification channel
pub type NotificationSender = mpsc::Sender<NotificationIntent>;

/// Receiver half of the bounded notification channel
pub type NotificationReceiver = mpsc::Receiver<NotificationIntent>;

/// Create the bounded notification channel
pub fn notification_channel(capacity: usize) -> (NotificationSender, NotificationReceiver) {
    mpsc::channel(capacity)
}
