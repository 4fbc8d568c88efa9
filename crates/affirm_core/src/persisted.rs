use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::StorageError;
use crate::record::NotificationRecord;
use crate::storage::{load_json, save_json, KeyValueStore};

/// Sorted record list mirrored in full under one storage key.
pub(crate) struct PersistedRecords {
    store: Arc<dyn KeyValueStore>,
    key: &'static str,
    order: fn(&NotificationRecord, &NotificationRecord) -> Ordering,
    records: Vec<NotificationRecord>,
    dirty: bool,
}

impl PersistedRecords {
    pub(crate) fn new(
        store: Arc<dyn KeyValueStore>,
        key: &'static str,
        order: fn(&NotificationRecord, &NotificationRecord) -> Ordering,
    ) -> Self {
        Self {
            store,
            key,
            order,
            records: Vec::new(),
            dirty: false,
        }
    }

    pub(crate) fn load(&mut self) -> Result<&[NotificationRecord], StorageError> {
        let mut loaded: Vec<NotificationRecord> =
            load_json(self.store.as_ref(), self.key)?.unwrap_or_default();
        let mut seen = HashSet::new();
        loaded.retain(|record| seen.insert(record.identifier.clone()));
        loaded.sort_by(self.order);
        debug!(key = self.key, count = loaded.len(), "records loaded");
        self.records = loaded;
        self.dirty = false;
        Ok(self.records.as_slice())
    }

    pub(crate) fn records(&self) -> &[NotificationRecord] {
        &self.records
    }

    pub(crate) fn position(&self, identifier: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|record| record.identifier == identifier)
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Applies `mutate` in memory and re-sorts. Call `flush` to write through.
    pub(crate) fn mutate<R>(&mut self, mutate: impl FnOnce(&mut Vec<NotificationRecord>) -> R) -> R {
        let out = mutate(&mut self.records);
        self.records.sort_by(self.order);
        self.dirty = true;
        out
    }

    pub(crate) fn flush(&mut self) -> Result<(), StorageError> {
        if !self.dirty {
            return Ok(());
        }
        match save_json(self.store.as_ref(), self.key, &self.records) {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(err) => {
                warn!(key = self.key, %err, "write-through save failed; will retry");
                Err(err)
            }
        }
    }
}
