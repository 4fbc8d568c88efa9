use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Opaque data bag stored alongside a scheduled notification. Only read back
/// for display after restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayloadData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub trigger: DateTime<Utc>,
    #[serde(default)]
    pub data: PayloadData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledNotification {
    pub identifier: String,
    pub payload: NotificationPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Delivered {
        identifier: String,
        at: DateTime<Utc>,
    },
}

pub type Listener = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Platform-specific notification services implement this trait.
pub trait NotificationTransport: Send + Sync {
    /// Schedules a local notification and returns the identifier the
    /// platform generated for it.
    fn schedule_notification(&self, payload: NotificationPayload) -> Result<String, TransportError>;
    fn cancel_scheduled_notification(&self, identifier: &str) -> Result<(), TransportError>;
    fn get_all_scheduled(&self) -> Result<Vec<ScheduledNotification>, TransportError>;
    fn add_listener(&self, listener: Listener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId) -> bool;
}
