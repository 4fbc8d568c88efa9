use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Fired,
    Cancelled,
}

impl NotificationStatus {
    pub fn is_archived(self) -> bool {
        !matches!(self, NotificationStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRecord {
    pub identifier: String,
    pub title: String,
    pub body: String,
    pub trigger_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: NotificationStatus,
    /// When the record left the pending set. `None` while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    pub fn pending(
        identifier: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        trigger_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            body: body.into(),
            trigger_at,
            created_at,
            status: NotificationStatus::Pending,
            archived_at: None,
        }
    }

    pub(crate) fn archive(mut self, status: NotificationStatus, at: DateTime<Utc>) -> Self {
        debug_assert!(status.is_archived());
        self.status = status;
        self.archived_at = Some(at);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == NotificationStatus::Pending
    }

    pub fn display_time(&self) -> DateTime<Utc> {
        self.archived_at.unwrap_or(self.trigger_at)
    }
}

pub fn pending_order(a: &NotificationRecord, b: &NotificationRecord) -> Ordering {
    a.trigger_at
        .cmp(&b.trigger_at)
        .then_with(|| a.identifier.cmp(&b.identifier))
}

pub fn history_order(a: &NotificationRecord, b: &NotificationRecord) -> Ordering {
    a.display_time()
        .cmp(&b.display_time())
        .then_with(|| a.identifier.cmp(&b.identifier))
}
