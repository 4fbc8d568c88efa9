use std::sync::Arc;

use crate::error::StorageError;
use crate::persisted::PersistedRecords;
use crate::record::{pending_order, NotificationRecord};
use crate::storage::KeyValueStore;

pub const PENDING_KEY: &str = "notification_pending";

/// Local view of what is still scheduled, mirrored to storage so a restarted
/// app can tell which notifications fired while it was not running.
pub struct PendingSet {
    records: PersistedRecords,
}

impl PendingSet {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            records: PersistedRecords::new(store, PENDING_KEY, pending_order),
        }
    }

    pub fn load(&mut self) -> Result<Vec<NotificationRecord>, StorageError> {
        Ok(self.records.load()?.to_vec())
    }

    pub fn insert(&mut self, record: NotificationRecord) -> bool {
        if self.contains(&record.identifier) {
            return false;
        }
        self.records.mutate(|records| records.push(record));
        true
    }

    pub fn take(&mut self, identifier: &str) -> Option<NotificationRecord> {
        let idx = self.records.position(identifier)?;
        Some(self.records.mutate(|records| records.remove(idx)))
    }

    pub fn replace_all(&mut self, next: Vec<NotificationRecord>) -> Vec<NotificationRecord> {
        self.records
            .mutate(|records| std::mem::replace(records, next))
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.records.flush()
    }

    pub fn records(&self) -> &[NotificationRecord] {
        self.records.records()
    }

    pub fn get(&self, identifier: &str) -> Option<&NotificationRecord> {
        self.records
            .position(identifier)
            .map(|idx| &self.records.records()[idx])
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.records.position(identifier).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.records().is_empty()
    }
}
