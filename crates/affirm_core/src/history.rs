use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::StorageError;
use crate::persisted::PersistedRecords;
use crate::record::{history_order, NotificationRecord};
use crate::storage::KeyValueStore;

pub const HISTORY_KEY: &str = "notification_history";

/// Append-only log of fired and cancelled notifications.
pub struct HistoryStore {
    records: PersistedRecords,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            records: PersistedRecords::new(store, HISTORY_KEY, history_order),
        }
    }

    pub fn load_all(&mut self) -> Result<Vec<NotificationRecord>, StorageError> {
        Ok(self.records.load()?.to_vec())
    }

    /// Adds an archived record. Returns `Ok(false)` when the identifier is
    /// already present, or when `record` is still pending.
    pub fn append(&mut self, record: NotificationRecord) -> Result<bool, StorageError> {
        if !record.status.is_archived() {
            warn!(identifier = %record.identifier, "refusing to archive a pending record");
            return Ok(false);
        }
        if self.contains(&record.identifier) {
            debug!(identifier = %record.identifier, "already archived");
            self.records.flush()?;
            return Ok(false);
        }
        self.records.mutate(|records| records.push(record));
        self.records.flush()?;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<usize, StorageError> {
        let removed = self.records.mutate(|records| {
            let count = records.len();
            records.clear();
            count
        });
        self.records.flush()?;
        Ok(removed)
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.records.flush()
    }

    pub fn is_dirty(&self) -> bool {
        self.records.is_dirty()
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
