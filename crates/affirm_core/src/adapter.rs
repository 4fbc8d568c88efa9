use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::error::{CancellationError, SchedulingError, TransportError};
use crate::record::{pending_order, NotificationRecord};
use crate::subscription::NotificationSubscription;
use crate::transport::{NotificationPayload, NotificationTransport, PayloadData};

/// Stable domain-facing wrapper around a [`NotificationTransport`].
pub struct SchedulingAdapter {
    transport: Arc<dyn NotificationTransport>,
    clock: Arc<dyn Clock>,
    timezone: Option<String>,
}

impl SchedulingAdapter {
    pub fn new(transport: Arc<dyn NotificationTransport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            clock,
            timezone: None,
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn subscription(&self) -> NotificationSubscription {
        NotificationSubscription::new(self.transport.clone())
    }

    pub fn schedule(
        &self,
        title: &str,
        body: &str,
        trigger_at: DateTime<Utc>,
    ) -> Result<String, SchedulingError> {
        self.schedule_created_at(title, body, trigger_at, self.clock.now())
    }

    #[instrument(skip(self, title, body), fields(action = "schedule"))]
    pub(crate) fn schedule_created_at(
        &self,
        title: &str,
        body: &str,
        trigger_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<String, SchedulingError> {
        let payload = NotificationPayload {
            title: title.to_string(),
            body: body.to_string(),
            trigger: trigger_at,
            data: PayloadData {
                trigger_at: Some(trigger_at),
                created_at: Some(created_at),
                timezone: self.timezone.clone(),
            },
        };
        match self.transport.schedule_notification(payload) {
            Ok(identifier) => {
                debug!(%identifier, "notification scheduled");
                Ok(identifier)
            }
            Err(TransportError::PermissionDenied) => {
                warn!(action = "schedule", "notification permission not granted");
                Err(SchedulingError::PermissionDenied)
            }
            Err(err) => {
                warn!(action = "schedule", %err, "transport refused notification");
                Err(SchedulingError::Transport(err))
            }
        }
    }

    #[instrument(skip(self), fields(action = "cancel"))]
    pub fn cancel(&self, identifier: &str) -> Result<(), CancellationError> {
        match self.transport.cancel_scheduled_notification(identifier) {
            Ok(()) => Ok(()),
            Err(TransportError::NotFound(_)) => {
                warn!(action = "cancel", %identifier, "transport has no such notification");
                Err(CancellationError::NotFound(identifier.to_string()))
            }
            Err(source) => {
                warn!(action = "cancel", %identifier, err = %source, "cancel failed");
                Err(CancellationError::Failed {
                    identifier: identifier.to_string(),
                    source,
                })
            }
        }
    }

    #[instrument(skip(self), fields(action = "list_pending"))]
    pub fn list_pending(&self) -> Result<Vec<NotificationRecord>, SchedulingError> {
        let scheduled = self.transport.get_all_scheduled().map_err(|err| {
            warn!(action = "list_pending", %err, "unable to list scheduled notifications");
            SchedulingError::Listing(err)
        })?;
        let now = self.clock.now();
        let mut records: Vec<NotificationRecord> = scheduled
            .into_iter()
            .map(|entry| {
                let data = entry.payload.data;
                NotificationRecord::pending(
                    entry.identifier,
                    entry.payload.title,
                    entry.payload.body,
                    data.trigger_at.unwrap_or(entry.payload.trigger),
                    data.created_at.unwrap_or(now),
                )
            })
            .collect();
        records.sort_by(pending_order);
        debug!(count = records.len(), "transport pending set fetched");
        Ok(records)
    }
}
