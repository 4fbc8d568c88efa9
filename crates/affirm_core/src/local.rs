use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{StorageError, TransportError};
use crate::storage::{load_json, save_json, KeyValueStore};
use crate::transport::{
    Listener, ListenerId, NotificationPayload, NotificationTransport, ScheduledNotification,
    TransportEvent,
};

type IdSource = Box<dyn FnMut() -> String + Send>;

pub const LOCAL_TRANSPORT_KEY: &str = "local_transport";

/// In-process transport used by the desktop shell and tests. Notifications are
/// only delivered when [`LocalTransport::deliver_due`] is called.
pub struct LocalTransport {
    scheduled: RwLock<BTreeMap<String, NotificationPayload>>,
    backing: Option<Arc<dyn KeyValueStore>>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    permission_granted: AtomicBool,
    id_source: Mutex<IdSource>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::with_id_source(|| uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id_source(source: impl FnMut() -> String + Send + 'static) -> Self {
        Self {
            scheduled: RwLock::new(BTreeMap::new()),
            backing: None,
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            permission_granted: AtomicBool::new(true),
            id_source: Mutex::new(Box::new(source)),
        }
    }

    pub fn open(store: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
        let scheduled: BTreeMap<String, NotificationPayload> =
            load_json(store.as_ref(), LOCAL_TRANSPORT_KEY)?.unwrap_or_default();
        debug!(count = scheduled.len(), "local transport restored");
        let mut transport = Self::new();
        transport.scheduled = RwLock::new(scheduled);
        transport.backing = Some(store);
        Ok(transport)
    }

    fn persist(&self, scheduled: &BTreeMap<String, NotificationPayload>) {
        if let Some(store) = &self.backing {
            if let Err(err) = save_json(store.as_ref(), LOCAL_TRANSPORT_KEY, scheduled) {
                warn!(%err, "local transport state not saved");
            }
        }
    }

    pub fn set_permission_granted(&self, granted: bool) {
        self.permission_granted.store(granted, Ordering::SeqCst);
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.read().len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Removes an entry without notifying listeners, as when the OS drops a
    /// notification while the app is not running.
    pub fn forget(&self, identifier: &str) -> bool {
        let mut scheduled = self.scheduled.write();
        let removed = scheduled.remove(identifier).is_some();
        if removed {
            self.persist(&scheduled);
        }
        removed
    }

    /// Delivers every notification whose trigger is at or before `now` and
    /// returns their identifiers in trigger order.
    pub fn deliver_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut due: Vec<(String, DateTime<Utc>)> = {
            let mut scheduled = self.scheduled.write();
            let ids: Vec<String> = scheduled
                .iter()
                .filter(|(_, payload)| payload.trigger <= now)
                .map(|(id, _)| id.clone())
                .collect();
            let due: Vec<(String, DateTime<Utc>)> = ids
                .into_iter()
                .filter_map(|id| scheduled.remove(&id).map(|payload| (id, payload.trigger)))
                .collect();
            if !due.is_empty() {
                self.persist(&scheduled);
            }
            due
        };
        due.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for (identifier, _) in &due {
            debug!(%identifier, "delivering local notification");
            let event = TransportEvent::Delivered {
                identifier: identifier.clone(),
                at: now,
            };
            for listener in &listeners {
                listener(&event);
            }
        }
        due.into_iter().map(|(id, _)| id).collect()
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationTransport for LocalTransport {
    fn schedule_notification(&self, payload: NotificationPayload) -> Result<String, TransportError> {
        if !self.permission_granted.load(Ordering::SeqCst) {
            return Err(TransportError::PermissionDenied);
        }
        let identifier = {
            let mut source = self.id_source.lock();
            (&mut **source)()
        };
        let mut scheduled = self.scheduled.write();
        if scheduled.contains_key(&identifier) {
            return Err(TransportError::Rejected(format!(
                "identifier `{identifier}` already scheduled"
            )));
        }
        scheduled.insert(identifier.clone(), payload);
        self.persist(&scheduled);
        Ok(identifier)
    }

    fn cancel_scheduled_notification(&self, identifier: &str) -> Result<(), TransportError> {
        let mut scheduled = self.scheduled.write();
        if scheduled.remove(identifier).is_none() {
            return Err(TransportError::NotFound(identifier.to_string()));
        }
        self.persist(&scheduled);
        Ok(())
    }

    fn get_all_scheduled(&self) -> Result<Vec<ScheduledNotification>, TransportError> {
        Ok(self
            .scheduled
            .read()
            .iter()
            .map(|(identifier, payload)| ScheduledNotification {
                identifier: identifier.clone(),
                payload: payload.clone(),
            })
            .collect())
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::transport::PayloadData;
    use chrono::{Duration, TimeZone};

    fn payload(trigger: DateTime<Utc>) -> NotificationPayload {
        NotificationPayload {
            title: "Morning".into(),
            body: "You are capable".into(),
            trigger,
            data: PayloadData::default(),
        }
    }

    fn sequential_ids() -> LocalTransport {
        let mut counter = 0;
        LocalTransport::with_id_source(move || {
            counter += 1;
            format!("n{counter}")
        })
    }

    #[test]
    fn schedule_and_cancel() {
        let transport = sequential_ids();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let id = transport.schedule_notification(payload(now)).unwrap();
        assert_eq!(id, "n1");
        assert_eq!(transport.get_all_scheduled().unwrap().len(), 1);
        transport.cancel_scheduled_notification(&id).unwrap();
        assert_eq!(
            transport.cancel_scheduled_notification(&id),
            Err(TransportError::NotFound("n1".into()))
        );
    }

    #[test]
    fn permission_denied_rejects_schedule() {
        let transport = sequential_ids();
        transport.set_permission_granted(false);
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        assert_eq!(
            transport.schedule_notification(payload(now)),
            Err(TransportError::PermissionDenied)
        );
        assert_eq!(transport.scheduled_count(), 0);
    }

    #[test]
    fn deliver_due_notifies_listeners_in_trigger_order() {
        let transport = sequential_ids();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        transport
            .schedule_notification(payload(now + Duration::hours(2)))
            .unwrap();
        transport
            .schedule_notification(payload(now + Duration::hours(1)))
            .unwrap();
        transport
            .schedule_notification(payload(now + Duration::hours(5)))
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = transport.add_listener(Arc::new(move |event: &TransportEvent| {
            let TransportEvent::Delivered { identifier, .. } = event;
            sink.lock().push(identifier.clone());
        }));

        let delivered = transport.deliver_due(now + Duration::hours(3));
        assert_eq!(delivered, vec!["n2".to_string(), "n1".to_string()]);
        assert_eq!(*seen.lock(), delivered);
        assert_eq!(transport.scheduled_count(), 1);

        assert!(transport.remove_listener(id));
        assert!(!transport.remove_listener(id));
    }

    #[test]
    fn backed_transport_survives_restart() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let id = {
            let transport = LocalTransport::open(store.clone()).unwrap();
            let keep = transport
                .schedule_notification(payload(now + Duration::hours(1)))
                .unwrap();
            let dropped = transport
                .schedule_notification(payload(now + Duration::hours(2)))
                .unwrap();
            transport.cancel_scheduled_notification(&dropped).unwrap();
            keep
        };
        let reopened = LocalTransport::open(store).unwrap();
        let scheduled = reopened.get_all_scheduled().unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].identifier, id);
    }
}
