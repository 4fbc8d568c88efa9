use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::adapter::SchedulingAdapter;
use crate::clock::{Clock, SystemClock};
use crate::error::{SchedulerError, SchedulerResult, SchedulingError, StorageError};
use crate::history::HistoryStore;
use crate::pending::PendingSet;
use crate::record::{NotificationRecord, NotificationStatus};
use crate::storage::KeyValueStore;
use crate::subscription::NotificationSubscription;
use crate::transport::{NotificationTransport, TransportEvent};
use crate::validation::{Submission, ValidationRules};

/// Every transition the UI layer may request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerOp {
    Submit(Submission),
    Cancel { identifier: String },
    Reconcile,
    Delivered { identifier: String, at: DateTime<Utc> },
    ClearHistory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerOutcome {
    Submitted { identifier: String },
    Cancelled { identifier: String, outcome: CancelOutcome },
    Reconciled(ReconcileReport),
    Delivered { identifier: String, archived: bool },
    HistoryCleared { removed: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelOutcome {
    Cancelled,
    SoftFailed,
    AlreadyArchived,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub fired: Vec<String>,
    pub adopted: Vec<String>,
    pub ignored: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.fired.is_empty() && self.adopted.is_empty()
    }
}

pub struct SchedulerStateBuilder {
    transport: Arc<dyn NotificationTransport>,
    store: Arc<dyn KeyValueStore>,
    clock: Option<Arc<dyn Clock>>,
    rules: ValidationRules,
    timezone: Option<String>,
}

impl SchedulerStateBuilder {
    pub fn new(transport: Arc<dyn NotificationTransport>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            transport,
            store,
            clock: None,
            rules: ValidationRules::default(),
            timezone: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn build(self) -> Result<SchedulerState, StorageError> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let mut adapter = SchedulingAdapter::new(self.transport, clock.clone());
        if let Some(timezone) = self.timezone {
            adapter = adapter.with_timezone(timezone);
        }
        let mut history = HistoryStore::new(self.store.clone());
        history.load_all()?;
        let mut pending = PendingSet::new(self.store);
        pending.load()?;

        let mut state = SchedulerState {
            adapter,
            clock,
            rules: self.rules,
            pending,
            history,
        };
        state.drop_archived_from_pending();
        info!(
            pending = state.pending.len(),
            history = state.history.len(),
            "scheduler state hydrated"
        );
        Ok(state)
    }
}

/// The single authority for notification lifecycle transitions.
pub struct SchedulerState {
    adapter: SchedulingAdapter,
    clock: Arc<dyn Clock>,
    rules: ValidationRules,
    pending: PendingSet,
    history: HistoryStore,
}

impl SchedulerState {
    pub fn builder(
        transport: Arc<dyn NotificationTransport>,
        store: Arc<dyn KeyValueStore>,
    ) -> SchedulerStateBuilder {
        SchedulerStateBuilder::new(transport, store)
    }

    pub fn apply(&mut self, op: SchedulerOp) -> SchedulerResult<SchedulerOutcome> {
        match op {
            SchedulerOp::Submit(submission) => {
                let identifier = self.submit(submission)?;
                Ok(SchedulerOutcome::Submitted { identifier })
            }
            SchedulerOp::Cancel { identifier } => {
                let outcome = self.cancel(&identifier)?;
                Ok(SchedulerOutcome::Cancelled {
                    identifier,
                    outcome,
                })
            }
            SchedulerOp::Reconcile => self.reconcile().map(SchedulerOutcome::Reconciled),
            SchedulerOp::Delivered { identifier, at } => {
                let archived = self.mark_delivered(&identifier, at)?;
                Ok(SchedulerOutcome::Delivered {
                    identifier,
                    archived,
                })
            }
            SchedulerOp::ClearHistory => {
                let removed = self.clear_history()?;
                Ok(SchedulerOutcome::HistoryCleared { removed })
            }
        }
    }

    /// Validates and schedules a new notification, then reconciles with the
    /// transport. Returns the transport-assigned identifier.
    #[instrument(skip(self, submission), fields(action = "submit"))]
    pub fn submit(&mut self, submission: Submission) -> SchedulerResult<String> {
        let now = self.clock.now();
        if let Err(errors) = self.rules.validate(&submission, now) {
            debug!(%errors, "submission rejected");
            return Err(errors.into());
        }

        let identifier = self.adapter.schedule_created_at(
            &submission.title,
            &submission.body,
            submission.trigger_at,
            now,
        )?;

        if self.pending.contains(&identifier) || self.history.contains(&identifier) {
            warn!(%identifier, "transport returned an identifier that is already tracked");
            if self.history.contains(&identifier) {
                if let Err(err) = self.adapter.cancel(&identifier) {
                    warn!(%identifier, %err, "unable to withdraw duplicate notification");
                }
            }
            return Err(SchedulingError::DuplicateIdentifier(identifier).into());
        }

        self.pending.insert(NotificationRecord::pending(
            identifier.clone(),
            submission.title,
            submission.body,
            submission.trigger_at,
            now,
        ));
        info!(%identifier, trigger_at = %submission.trigger_at, "notification pending");

        if let Err(err) = self.reconcile() {
            warn!(%identifier, %err, "reconcile after submit failed");
            self.flush_pending();
        }
        Ok(identifier)
    }

    /// Cancels a pending notification and archives it as cancelled. An
    /// identifier the transport no longer knows is archived all the same.
    #[instrument(skip(self), fields(action = "cancel"))]
    pub fn cancel(&mut self, identifier: &str) -> SchedulerResult<CancelOutcome> {
        if !self.pending.contains(identifier) {
            if self.history.contains(identifier) {
                debug!(%identifier, "cancel on archived notification");
                return Ok(CancelOutcome::AlreadyArchived);
            }
            return Err(SchedulerError::NotPending(identifier.to_string()));
        }

        let outcome = match self.adapter.cancel(identifier) {
            Ok(()) => CancelOutcome::Cancelled,
            Err(err) if err.is_soft() => CancelOutcome::SoftFailed,
            Err(err) => return Err(err.into()),
        };
        let now = self.clock.now();
        self.archive(identifier, NotificationStatus::Cancelled, now)?;
        info!(%identifier, ?outcome, "notification cancelled");
        Ok(outcome)
    }

    /// Replaces the pending set with the transport's view. Anything that was
    /// pending locally but is gone from the transport has fired.
    #[instrument(skip(self), fields(action = "reconcile"))]
    pub fn reconcile(&mut self) -> SchedulerResult<ReconcileReport> {
        let remote = self.adapter.list_pending()?;
        let now = self.clock.now();
        let remote_ids: HashSet<String> = remote.iter().map(|r| r.identifier.clone()).collect();

        let mut report = ReconcileReport::default();
        let mut next = Vec::with_capacity(remote.len());
        for mut record in remote {
            if self.history.contains(&record.identifier) {
                report.ignored.push(record.identifier);
                continue;
            }
            match self.pending.get(&record.identifier) {
                // the transport may not carry a creation time; keep ours
                Some(tracked) => record.created_at = tracked.created_at,
                None => report.adopted.push(record.identifier.clone()),
            }
            next.push(record);
        }

        let previous = self.pending.replace_all(next);
        let mut first_err: Option<StorageError> = None;
        for record in previous {
            if remote_ids.contains(&record.identifier) {
                continue;
            }
            let fired_at = record.trigger_at.min(now);
            report.fired.push(record.identifier.clone());
            if let Err(err) = self
                .history
                .append(record.archive(NotificationStatus::Fired, fired_at))
            {
                first_err.get_or_insert(err);
            }
        }
        self.flush_pending();

        if !report.ignored.is_empty() {
            warn!(ignored = ?report.ignored, "transport still lists archived notifications");
        }
        if report.is_noop() {
            debug!("reconcile found no changes");
        } else {
            info!(
                fired = report.fired.len(),
                adopted = report.adopted.len(),
                "pending set reconciled"
            );
        }
        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(report),
        }
    }

    pub fn mark_delivered(&mut self, identifier: &str, at: DateTime<Utc>) -> SchedulerResult<bool> {
        if !self.pending.contains(identifier) {
            debug!(%identifier, "delivery for untracked notification");
            return Ok(false);
        }
        self.archive(identifier, NotificationStatus::Fired, at)?;
        info!(%identifier, "notification fired");
        Ok(true)
    }

    pub fn drain_events(
        &mut self,
        subscription: &NotificationSubscription,
    ) -> SchedulerResult<Vec<String>> {
        let mut archived = Vec::new();
        let mut first_err: Option<SchedulerError> = None;
        for event in subscription.drain() {
            match event {
                TransportEvent::Delivered { identifier, at } => {
                    match self.mark_delivered(&identifier, at) {
                        Ok(true) => archived.push(identifier),
                        Ok(false) => {}
                        Err(err) => {
                            archived.push(identifier);
                            first_err.get_or_insert(err);
                        }
                    }
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(archived),
        }
    }

    pub fn clear_history(&mut self) -> SchedulerResult<usize> {
        let removed = self.history.clear()?;
        info!(removed, "history cleared");
        Ok(removed)
    }

    pub fn flush(&mut self) -> SchedulerResult<()> {
        self.pending.flush()?;
        self.history.flush()?;
        Ok(())
    }

    pub fn subscription(&self) -> NotificationSubscription {
        self.adapter.subscription()
    }

    pub fn pending(&self) -> &[NotificationRecord] {
        self.pending.records()
    }

    pub fn history(&self) -> &[NotificationRecord] {
        self.history.records()
    }

    pub fn get(&self, identifier: &str) -> Option<&NotificationRecord> {
        self.pending
            .get(identifier)
            .or_else(|| self.history.get(identifier))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl SchedulerState {
    fn archive(
        &mut self,
        identifier: &str,
        status: NotificationStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let Some(record) = self.pending.take(identifier) else {
            return Ok(());
        };
        let result = self.history.append(record.archive(status, at)).map(|_| ());
        self.flush_pending();
        result
    }

    fn flush_pending(&mut self) {
        if let Err(err) = self.pending.flush() {
            warn!(%err, "pending snapshot not saved");
        }
    }

    fn drop_archived_from_pending(&mut self) {
        let stale: Vec<String> = self
            .pending
            .records()
            .iter()
            .filter(|record| self.history.contains(&record.identifier))
            .map(|record| record.identifier.clone())
            .collect();
        if stale.is_empty() {
            return;
        }
        for identifier in &stale {
            self.pending.take(identifier);
        }
        warn!(count = stale.len(), "dropped archived records from pending snapshot");
        self.flush_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{CancellationError, Field, TransportError};
    use crate::local::LocalTransport;
    use crate::storage::MemoryStore;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        transport: Arc<LocalTransport>,
        store: Arc<MemoryStore>,
        clock: ManualClock,
    }

    impl Fixture {
        fn new() -> Self {
            let mut counter = 0;
            Self {
                transport: Arc::new(LocalTransport::with_id_source(move || {
                    counter += 1;
                    format!("id{counter}")
                })),
                store: Arc::new(MemoryStore::new()),
                clock: ManualClock::new(Utc.with_ymd_and_hms(2025, 9, 1, 8, 0, 0).unwrap()),
            }
        }

        fn state(&self) -> SchedulerState {
            SchedulerState::builder(self.transport.clone(), self.store.clone())
                .with_clock(Arc::new(self.clock.clone()))
                .build()
                .expect("build state")
        }

        fn at(&self, minutes: i64) -> DateTime<Utc> {
            self.clock.now() + Duration::minutes(minutes)
        }
    }

    #[test]
    fn validation_failure_never_reaches_transport() {
        let fx = Fixture::new();
        let mut state = fx.state();
        let err = state
            .submit(Submission::new("Hi", "Valid message content", fx.at(5)))
            .unwrap_err();
        match err {
            SchedulerError::Validation(errors) => assert_eq!(
                errors.for_field(Field::Title),
                Some("Title needs to be at least 3 characters")
            ),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fx.transport.scheduled_count(), 0);
        assert!(state.pending().is_empty());
    }

    #[test]
    fn apply_dispatches_each_operation() {
        let fx = Fixture::new();
        let mut state = fx.state();
        let outcome = state
            .apply(SchedulerOp::Submit(Submission::new(
                "Morning",
                "You are capable",
                fx.at(60),
            )))
            .unwrap();
        assert_eq!(
            outcome,
            SchedulerOutcome::Submitted {
                identifier: "id1".into()
            }
        );

        let outcome = state
            .apply(SchedulerOp::Cancel {
                identifier: "id1".into(),
            })
            .unwrap();
        assert_eq!(
            outcome,
            SchedulerOutcome::Cancelled {
                identifier: "id1".into(),
                outcome: CancelOutcome::Cancelled,
            }
        );

        let outcome = state.apply(SchedulerOp::Reconcile).unwrap();
        assert_eq!(outcome, SchedulerOutcome::Reconciled(ReconcileReport::default()));

        let outcome = state
            .apply(SchedulerOp::Delivered {
                identifier: "id1".into(),
                at: fx.at(60),
            })
            .unwrap();
        assert_eq!(
            outcome,
            SchedulerOutcome::Delivered {
                identifier: "id1".into(),
                archived: false,
            }
        );

        let outcome = state.apply(SchedulerOp::ClearHistory).unwrap();
        assert_eq!(outcome, SchedulerOutcome::HistoryCleared { removed: 1 });
    }

    #[test]
    fn cancel_after_transport_forgot_is_soft() {
        let fx = Fixture::new();
        let mut state = fx.state();
        let id = state
            .submit(Submission::new("Morning", "You are capable", fx.at(60)))
            .unwrap();
        fx.transport.forget(&id);

        assert_eq!(state.cancel(&id).unwrap(), CancelOutcome::SoftFailed);
        assert!(state.pending().is_empty());
        assert_eq!(
            state.get(&id).map(|r| r.status),
            Some(NotificationStatus::Cancelled)
        );
        assert_eq!(state.cancel(&id).unwrap(), CancelOutcome::AlreadyArchived);
    }

    #[test]
    fn cancel_of_unknown_identifier_is_rejected() {
        let fx = Fixture::new();
        let mut state = fx.state();
        assert!(matches!(
            state.cancel("nope"),
            Err(SchedulerError::NotPending(id)) if id == "nope"
        ));
    }

    #[test]
    fn permission_denied_leaves_state_usable() {
        let fx = Fixture::new();
        let mut state = fx.state();
        fx.transport.set_permission_granted(false);
        assert!(matches!(
            state.submit(Submission::new("Morning", "You are capable", fx.at(60))),
            Err(SchedulerError::Scheduling(SchedulingError::PermissionDenied))
        ));
        fx.transport.set_permission_granted(true);
        assert!(state
            .submit(Submission::new("Morning", "You are capable", fx.at(60)))
            .is_ok());
        assert_eq!(state.pending().len(), 1);
    }

    #[test]
    fn delivery_events_archive_as_fired() {
        let fx = Fixture::new();
        let mut state = fx.state();
        let mut subscription = state.subscription();
        subscription.start();

        let id = state
            .submit(Submission::new("Morning", "You are capable", fx.at(30)))
            .unwrap();
        fx.clock.advance(Duration::minutes(31));
        let delivered_at = fx.clock.now();
        fx.transport.deliver_due(delivered_at);

        assert_eq!(state.drain_events(&subscription).unwrap(), vec![id.clone()]);
        let record = state.get(&id).expect("archived");
        assert_eq!(record.status, NotificationStatus::Fired);
        assert_eq!(record.archived_at, Some(delivered_at));
        subscription.stop();
    }

    #[test]
    fn reconcile_ignores_transport_entries_already_archived() {
        let fx = Fixture::new();
        let mut state = fx.state();
        let id = state
            .submit(Submission::new("Morning", "You are capable", fx.at(60)))
            .unwrap();
        state.cancel(&id).unwrap();

        // The platform resurrects the entry, e.g. after a restore from backup.
        let trigger = fx.at(60);
        let mut same_id = Some(id.clone());
        let resurrecting = LocalTransport::with_id_source(move || same_id.take().unwrap_or_default());
        let resurrecting = Arc::new(resurrecting);
        resurrecting
            .schedule_notification(crate::transport::NotificationPayload {
                title: "Morning".into(),
                body: "You are capable".into(),
                trigger,
                data: Default::default(),
            })
            .unwrap();
        let store = fx.store.clone();
        let mut restored = SchedulerState::builder(resurrecting, store)
            .with_clock(Arc::new(fx.clock.clone()))
            .build()
            .unwrap();

        let report = restored.reconcile().unwrap();
        assert_eq!(report.ignored, vec![id.clone()]);
        assert!(restored.pending().is_empty());
        assert_eq!(restored.history().len(), 1);
    }

    #[test]
    fn adopted_entries_keep_their_creation_time_across_reconciles() {
        let fx = Fixture::new();
        let mut state = fx.state();
        let id = fx
            .transport
            .schedule_notification(crate::transport::NotificationPayload {
                title: "Scheduled elsewhere".into(),
                body: "No data bag attached".into(),
                trigger: fx.at(120),
                data: Default::default(),
            })
            .unwrap();

        let report = state.reconcile().unwrap();
        assert_eq!(report.adopted, vec![id.clone()]);
        let snapshot = state.pending().to_vec();
        assert_eq!(snapshot[0].created_at, fx.clock.now());

        fx.clock.advance(Duration::minutes(30));
        let report = state.reconcile().unwrap();
        assert!(report.is_noop());
        assert_eq!(state.pending(), snapshot.as_slice());
    }

    #[test]
    fn hard_cancel_failure_keeps_record_pending() {
        struct StuckTransport(LocalTransport);

        impl NotificationTransport for StuckTransport {
            fn schedule_notification(
                &self,
                payload: crate::transport::NotificationPayload,
            ) -> Result<String, TransportError> {
                self.0.schedule_notification(payload)
            }

            fn cancel_scheduled_notification(&self, _: &str) -> Result<(), TransportError> {
                Err(TransportError::Unavailable("service restarting".into()))
            }

            fn get_all_scheduled(
                &self,
            ) -> Result<Vec<crate::transport::ScheduledNotification>, TransportError> {
                self.0.get_all_scheduled()
            }

            fn add_listener(&self, listener: crate::transport::Listener) -> crate::transport::ListenerId {
                self.0.add_listener(listener)
            }

            fn remove_listener(&self, id: crate::transport::ListenerId) -> bool {
                self.0.remove_listener(id)
            }
        }

        let fx = Fixture::new();
        let mut state = SchedulerState::builder(
            Arc::new(StuckTransport(LocalTransport::new())),
            fx.store.clone(),
        )
        .with_clock(Arc::new(fx.clock.clone()))
        .build()
        .unwrap();
        let id = state
            .submit(Submission::new("Morning", "You are capable", fx.at(60)))
            .unwrap();
        assert!(matches!(
            state.cancel(&id),
            Err(SchedulerError::Cancellation(CancellationError::Failed { .. }))
        ));
        assert_eq!(state.pending().len(), 1);
        assert!(state.history().is_empty());
    }
}
