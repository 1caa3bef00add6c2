//! The sync envelope wrapped around every stored payload.
//!
//! A [`SyncableRecord`] pairs a domain payload with the metadata the sync
//! engine needs: where the record stands relative to the server, how many
//! pushes have failed in a row, and a revision counter for optimistic
//! concurrency. The metadata is private; it only changes through the
//! lifecycle methods below, which keep the following invariants:
//!
//! - `needs_sync()` is true exactly when the state is not [`SyncState::Ok`]
//! - an `Ok` record has no error and zero attempts
//! - a `PendingCreate` record has never been acknowledged by the server
//!
//! ```text
//!            create                edit / delete
//!   (local) ───────► PendingCreate ───────────────► PendingUpdate / PendingDelete
//!                        │                                  │
//!                 push ok│        push failed               │push ok
//!                        ▼      ┌──────────► Error ─────────┤
//!                        Ok ◄───┘  (next attempt retries)   ▼
//!                                                    Ok / removed
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a record stands relative to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    /// Confirmed by the server.
    #[default]
    Ok,
    /// Created locally, never pushed successfully.
    PendingCreate,
    /// Edited locally since the last confirmed push or pull.
    PendingUpdate,
    /// Deleted locally, deletion not yet confirmed.
    PendingDelete,
    /// The last push failed.
    Error,
}

impl SyncState {
    /// Returns true for every state except [`SyncState::Ok`].
    pub const fn needs_sync(self) -> bool {
        !matches!(self, Self::Ok)
    }

    /// Returns the persisted name of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::PendingCreate => "PENDING_CREATE",
            Self::PendingUpdate => "PENDING_UPDATE",
            Self::PendingDelete => "PENDING_DELETE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unconfirmed local change a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PendingOp {
    /// The server has never seen the record.
    Create,
    /// The server has an older version.
    Update,
    /// The server still has a record that was deleted locally.
    Delete,
}

impl PendingOp {
    /// The pending state for this operation.
    pub const fn state(self) -> SyncState {
        match self {
            Self::Create => SyncState::PendingCreate,
            Self::Update => SyncState::PendingUpdate,
            Self::Delete => SyncState::PendingDelete,
        }
    }
}

/// Why a record is in [`SyncState::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Transient failure; the next pass tries again.
    Retryable,
    /// The payload was rejected; it must be corrected before another try.
    Terminal,
    /// Too many consecutive failures; left for an operator.
    Exhausted,
}

impl FailureKind {
    /// Returns true if passes may attempt the record again on their own.
    pub const fn is_auto_retryable(self) -> bool {
        matches!(self, Self::Retryable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Synced,
    Pending(PendingOp),
    Failed { op: PendingOp, kind: FailureKind },
}

impl Status {
    fn op(self) -> Option<PendingOp> {
        match self {
            Self::Synced => None,
            Self::Pending(op) | Self::Failed { op, .. } => Some(op),
        }
    }
}

/// What happened to a record asked to delete itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteDisposition {
    /// The server never saw the record; drop it locally right away.
    Purge,
    /// The record is now pending deletion on the server.
    Pending,
}

/// Server acknowledgement of a pushed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAck {
    /// The id the server stores the record under.
    pub server_id: RecordId,
    /// Server modification time of the accepted write.
    pub server_last_updated: Timestamp,
}

impl ServerAck {
    /// Creates an acknowledgement.
    pub fn new(server_id: impl Into<RecordId>, server_last_updated: Timestamp) -> Self {
        Self {
            server_id: server_id.into(),
            server_last_updated,
        }
    }
}

/// A record as reported by the server during a pull.
///
/// A `None` payload marks a server-side deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord<T> {
    /// Server id.
    pub id: RecordId,
    /// Current payload, absent for deletions.
    pub payload: Option<T>,
    /// Server modification time.
    pub server_last_updated: Timestamp,
}

impl<T> RemoteRecord<T> {
    /// A live record.
    pub fn live(id: impl Into<RecordId>, payload: T, server_last_updated: Timestamp) -> Self {
        Self {
            id: id.into(),
            payload: Some(payload),
            server_last_updated,
        }
    }

    /// A deletion marker.
    pub fn deleted(id: impl Into<RecordId>, server_last_updated: Timestamp) -> Self {
        Self {
            id: id.into(),
            payload: None,
            server_last_updated,
        }
    }

    /// Returns true if the server deleted the record.
    pub fn is_deleted(&self) -> bool {
        self.payload.is_none()
    }
}

/// A payload plus its sync metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncableRecord<T> {
    pub(crate) id: RecordId,
    pub(crate) payload: T,
    pub(crate) last_client_update: Timestamp,
    pub(crate) server_last_updated: Option<Timestamp>,
    pub(crate) status: Status,
    pub(crate) last_sync_error: Option<String>,
    pub(crate) sync_attempts: u32,
    pub(crate) last_attempt_at: Option<Timestamp>,
    pub(crate) revision: u64,
}

impl<T> SyncableRecord<T> {
    /// A record created locally, waiting for its first push.
    pub fn new_local(id: RecordId, payload: T, now: Timestamp) -> Self {
        Self {
            id,
            payload,
            last_client_update: now,
            server_last_updated: None,
            status: Status::Pending(PendingOp::Create),
            last_sync_error: None,
            sync_attempts: 0,
            last_attempt_at: None,
            revision: 0,
        }
    }

    /// A record fetched from the server.
    pub fn synced(id: RecordId, payload: T, server_last_updated: Timestamp) -> Self {
        Self {
            id,
            payload,
            last_client_update: server_last_updated,
            server_last_updated: Some(server_last_updated),
            status: Status::Synced,
            last_sync_error: None,
            sync_attempts: 0,
            last_attempt_at: None,
            revision: 0,
        }
    }

    /// A deletion the server still has to learn about.
    ///
    /// Used when a record was purged locally while its create was in flight
    /// and the server accepted the create anyway.
    pub fn pending_remote_delete(ack: &ServerAck, payload: T, now: Timestamp) -> Self {
        Self {
            id: ack.server_id.clone(),
            payload,
            last_client_update: now,
            server_last_updated: Some(ack.server_last_updated),
            status: Status::Pending(PendingOp::Delete),
            last_sync_error: None,
            sync_attempts: 0,
            last_attempt_at: None,
            revision: 0,
        }
    }

    /// Record id.
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Domain payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Consumes the record, returning the payload.
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Time of the last local mutation.
    pub fn last_client_update(&self) -> Timestamp {
        self.last_client_update
    }

    /// Server time of the last confirmed version, `None` if never synced.
    pub fn server_last_updated(&self) -> Option<Timestamp> {
        self.server_last_updated
    }

    /// Current sync state.
    ///
    /// A failed record reports `Error` until its next push outcome is
    /// written, including while that push is in flight. The change it still
    /// carries is available from [`SyncableRecord::pending_op`].
    pub fn sync_state(&self) -> SyncState {
        match self.status {
            Status::Synced => SyncState::Ok,
            Status::Pending(op) => op.state(),
            Status::Failed { .. } => SyncState::Error,
        }
    }

    /// Returns true while local state is unconfirmed by the server.
    pub fn needs_sync(&self) -> bool {
        self.sync_state().needs_sync()
    }

    /// The unconfirmed change, also reported while in `Error`.
    ///
    /// A retry pushes this change again without first moving the record
    /// back to its `Pending*` state.
    pub fn pending_op(&self) -> Option<PendingOp> {
        self.status.op()
    }

    /// Why the last push failed, if the record is in `Error`.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.status {
            Status::Failed { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Returns true if the record is excluded from automatic retry.
    pub fn needs_attention(&self) -> bool {
        self.failure_kind()
            .is_some_and(|kind| !kind.is_auto_retryable())
    }

    /// Message of the last failed push.
    pub fn last_sync_error(&self) -> Option<&str> {
        self.last_sync_error.as_deref()
    }

    /// Consecutive failed pushes since the last success.
    pub fn sync_attempts(&self) -> u32 {
        self.sync_attempts
    }

    /// Time of the most recent push attempt.
    pub fn last_attempt_at(&self) -> Option<Timestamp> {
        self.last_attempt_at
    }

    /// Store revision, bumped by every committed write of this record.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Replaces the payload with a local edit.
    ///
    /// Synced records become `PendingUpdate`; records in `Error` return to
    /// their pending operation so the corrected payload is retried. The
    /// attempt counter is kept.
    ///
    /// # Errors
    ///
    /// [`CoreError::RecordDeleted`] if the record is pending deletion.
    pub fn edit(&mut self, payload: T, now: Timestamp) -> CoreResult<()> {
        let op = match self.status {
            Status::Synced => PendingOp::Update,
            Status::Pending(PendingOp::Delete) | Status::Failed {
                op: PendingOp::Delete,
                ..
            } => {
                return Err(CoreError::RecordDeleted {
                    id: self.id.clone(),
                })
            }
            Status::Pending(op) | Status::Failed { op, .. } => op,
        };
        self.payload = payload;
        self.status = Status::Pending(op);
        self.last_client_update = now;
        Ok(())
    }

    /// Marks the record as deleted locally.
    ///
    /// Records the server never saw report [`DeleteDisposition::Purge`] and
    /// are left untouched for the caller to drop.
    pub fn mark_deleted(&mut self, now: Timestamp) -> DeleteDisposition {
        match self.status {
            Status::Pending(PendingOp::Create)
            | Status::Failed {
                op: PendingOp::Create,
                ..
            } => DeleteDisposition::Purge,
            Status::Pending(PendingOp::Delete)
            | Status::Failed {
                op: PendingOp::Delete,
                ..
            } => DeleteDisposition::Pending,
            Status::Synced | Status::Pending(PendingOp::Update) | Status::Failed { .. } => {
                self.status = Status::Pending(PendingOp::Delete);
                self.last_client_update = now;
                DeleteDisposition::Pending
            }
        }
    }

    /// Applies a successful create or update push.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTransition`] for synced records and pending
    /// deletions; a confirmed delete removes the record instead.
    pub fn record_success(&mut self, ack: &ServerAck, now: Timestamp) -> CoreResult<()> {
        match self.status.op() {
            Some(PendingOp::Create | PendingOp::Update) => {}
            _ => {
                return Err(CoreError::invalid_transition(
                    self.id.clone(),
                    self.sync_state(),
                    "confirm a push for",
                ))
            }
        }
        self.adopt_ack(ack, now);
        self.status = Status::Synced;
        Ok(())
    }

    /// Adopts a server acknowledgement for a record that changed locally
    /// while the push was in flight.
    ///
    /// The server id and timestamp are taken over and the failure streak is
    /// cleared, but the record stays pending so the newer local change is
    /// pushed on the next pass.
    pub fn rebase_on_ack(&mut self, ack: &ServerAck, now: Timestamp) {
        self.adopt_ack(ack, now);
        self.status = match self.status.op() {
            None => Status::Synced,
            Some(PendingOp::Delete) => Status::Pending(PendingOp::Delete),
            Some(PendingOp::Create | PendingOp::Update) => Status::Pending(PendingOp::Update),
        };
    }

    fn adopt_ack(&mut self, ack: &ServerAck, now: Timestamp) {
        self.id = ack.server_id.clone();
        self.server_last_updated = Some(ack.server_last_updated);
        self.last_sync_error = None;
        self.sync_attempts = 0;
        self.last_attempt_at = Some(now);
    }

    /// Records a failed push and returns the resulting failure kind.
    ///
    /// Non-retryable failures are `Terminal`; retryable ones become
    /// `Exhausted` once `max_attempts` consecutive failures are reached.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTransition`] if the record is already synced.
    pub fn record_failure(
        &mut self,
        message: impl Into<String>,
        retryable: bool,
        max_attempts: u32,
        now: Timestamp,
    ) -> CoreResult<FailureKind> {
        let Some(op) = self.status.op() else {
            return Err(CoreError::invalid_transition(
                self.id.clone(),
                SyncState::Ok,
                "record a failure for",
            ));
        };
        self.sync_attempts = self.sync_attempts.saturating_add(1);
        let kind = if !retryable {
            FailureKind::Terminal
        } else if self.sync_attempts >= max_attempts {
            FailureKind::Exhausted
        } else {
            FailureKind::Retryable
        };
        self.status = Status::Failed { op, kind };
        self.last_sync_error = Some(message.into());
        self.last_attempt_at = Some(now);
        Ok(kind)
    }

    /// Operator reset: clears the failure streak and returns the record to
    /// its pending operation.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTransition`] unless the record is in `Error`.
    pub fn retry_now(&mut self) -> CoreResult<()> {
        let Status::Failed { op, .. } = self.status else {
            return Err(CoreError::invalid_transition(
                self.id.clone(),
                self.sync_state(),
                "retry",
            ));
        };
        self.status = Status::Pending(op);
        self.last_sync_error = None;
        self.sync_attempts = 0;
        self.last_attempt_at = None;
        Ok(())
    }

    /// Overwrites the record with the server's version.
    pub fn apply_remote(&mut self, payload: T, server_last_updated: Timestamp) {
        self.payload = payload;
        self.server_last_updated = Some(server_last_updated);
        self.status = Status::Synced;
        self.last_sync_error = None;
        self.sync_attempts = 0;
    }

    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        match self.status {
            Status::Synced if self.last_sync_error.is_some() || self.sync_attempts != 0 => {
                Err(format!("synced record {} carries failure metadata", self.id))
            }
            Status::Pending(PendingOp::Create) if self.server_last_updated.is_some() => Err(
                format!("record {} is pending create but has a server timestamp", self.id),
            ),
            Status::Failed { .. } if self.last_sync_error.is_none() => {
                Err(format!("failed record {} has no error message", self.id))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ts(millis: u64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    fn local(payload: &str) -> SyncableRecord<String> {
        SyncableRecord::new_local(RecordId::new("c1"), payload.to_string(), ts(10))
    }

    #[test]
    fn new_local_record_is_pending_create() {
        let record = local("hen");
        assert_eq!(record.sync_state(), SyncState::PendingCreate);
        assert!(record.needs_sync());
        assert_eq!(record.server_last_updated(), None);
        assert_eq!(record.pending_op(), Some(PendingOp::Create));
    }

    #[test]
    fn successful_create_adopts_server_identity() {
        let mut record = local("hen");
        record
            .record_success(&ServerAck::new("S1", ts(50)), ts(20))
            .unwrap();

        assert_eq!(record.id().as_str(), "S1");
        assert_eq!(record.sync_state(), SyncState::Ok);
        assert_eq!(record.server_last_updated(), Some(ts(50)));
        assert_eq!(record.sync_attempts(), 0);
        assert!(record.check_invariants().is_ok());
    }

    #[test]
    fn editing_synced_record_marks_update() {
        let mut record = SyncableRecord::synced(RecordId::new("S1"), "a".to_string(), ts(100));
        record.edit("b".to_string(), ts(150)).unwrap();
        assert_eq!(record.sync_state(), SyncState::PendingUpdate);
        assert_eq!(record.last_client_update(), ts(150));
    }

    #[test]
    fn editing_pending_create_stays_create() {
        let mut record = local("a");
        record.edit("b".to_string(), ts(11)).unwrap();
        assert_eq!(record.sync_state(), SyncState::PendingCreate);
        assert_eq!(record.payload(), "b");
    }

    #[test]
    fn editing_pending_delete_is_rejected() {
        let mut record = SyncableRecord::synced(RecordId::new("S1"), "a".to_string(), ts(100));
        assert_eq!(record.mark_deleted(ts(120)), DeleteDisposition::Pending);
        let err = record.edit("b".to_string(), ts(130)).unwrap_err();
        assert!(matches!(err, CoreError::RecordDeleted { .. }));
        assert_eq!(record.payload(), "a");
    }

    #[test]
    fn deleting_unpushed_record_purges() {
        let mut record = local("a");
        assert_eq!(record.mark_deleted(ts(11)), DeleteDisposition::Purge);
        assert_eq!(record.sync_state(), SyncState::PendingCreate);
    }

    #[test]
    fn failed_update_reports_error_until_next_outcome() {
        let mut record = SyncableRecord::synced(RecordId::new("S1"), "a".to_string(), ts(100));
        record.edit("b".to_string(), ts(110)).unwrap();
        record.record_failure("timeout", true, 5, ts(120)).unwrap();

        assert_eq!(record.sync_state(), SyncState::Error);
        assert_eq!(record.pending_op(), Some(PendingOp::Update));
        assert!(record.needs_sync());

        record
            .record_success(&ServerAck::new("S1", ts(130)), ts(130))
            .unwrap();
        assert_eq!(record.sync_state(), SyncState::Ok);
        assert_eq!(record.pending_op(), None);
    }

    #[test]
    fn failures_count_up_to_exhaustion() {
        let mut record = local("a");
        for attempt in 1..5 {
            let kind = record.record_failure("timeout", true, 5, ts(attempt)).unwrap();
            assert_eq!(kind, FailureKind::Retryable);
            assert_eq!(record.sync_attempts(), attempt as u32);
        }
        let kind = record.record_failure("timeout", true, 5, ts(5)).unwrap();
        assert_eq!(kind, FailureKind::Exhausted);
        assert_eq!(record.sync_state(), SyncState::Error);
        assert!(record.needs_attention());
        assert_eq!(record.pending_op(), Some(PendingOp::Create));
    }

    #[test]
    fn rejected_payload_is_terminal_until_edited() {
        let mut record = local("a");
        let kind = record
            .record_failure("missing name", false, 5, ts(12))
            .unwrap();
        assert_eq!(kind, FailureKind::Terminal);
        assert!(record.needs_attention());

        record.edit("fixed".to_string(), ts(13)).unwrap();
        assert_eq!(record.sync_state(), SyncState::PendingCreate);
        assert_eq!(record.sync_attempts(), 1);
        assert!(!record.needs_attention());
    }

    #[test]
    fn failure_on_synced_record_is_invalid() {
        let mut record = SyncableRecord::synced(RecordId::new("S1"), "a".to_string(), ts(1));
        assert!(record.record_failure("boom", true, 5, ts(2)).is_err());
        assert_eq!(record.sync_state(), SyncState::Ok);
    }

    #[test]
    fn retry_now_resets_streak() {
        let mut record = local("a");
        record.record_failure("offline", true, 1, ts(2)).unwrap();
        assert_eq!(record.failure_kind(), Some(FailureKind::Exhausted));

        record.retry_now().unwrap();
        assert_eq!(record.sync_state(), SyncState::PendingCreate);
        assert_eq!(record.sync_attempts(), 0);
        assert_eq!(record.last_sync_error(), None);
        assert!(local("b").retry_now().is_err());
    }

    #[test]
    fn rebase_keeps_newer_local_edit_pending() {
        let mut record = local("a");
        record.edit("b".to_string(), ts(11)).unwrap();
        record.rebase_on_ack(&ServerAck::new("S9", ts(40)), ts(12));

        assert_eq!(record.id().as_str(), "S9");
        assert_eq!(record.sync_state(), SyncState::PendingUpdate);
        assert_eq!(record.server_last_updated(), Some(ts(40)));
        assert_eq!(record.payload(), "b");
        assert!(record.check_invariants().is_ok());
    }

    #[test]
    fn confirming_a_delete_through_success_is_invalid() {
        let mut record = SyncableRecord::synced(RecordId::new("S1"), "a".to_string(), ts(1));
        record.mark_deleted(ts(2));
        assert!(record
            .record_success(&ServerAck::new("S1", ts(3)), ts(3))
            .is_err());
    }

    #[derive(Debug, Clone)]
    enum Step {
        Edit,
        Delete,
        Fail(bool),
        Succeed,
        Rebase,
        Retry,
        Remote,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Edit),
            Just(Step::Delete),
            any::<bool>().prop_map(Step::Fail),
            Just(Step::Succeed),
            Just(Step::Rebase),
            Just(Step::Retry),
            Just(Step::Remote),
        ]
    }

    proptest! {
        #[test]
        fn lifecycle_never_breaks_invariants(steps in prop::collection::vec(step(), 0..40)) {
            let mut record = local("start");
            for (i, step) in steps.into_iter().enumerate() {
                let now = ts(100 + i as u64);
                match step {
                    Step::Edit => { let _ = record.edit(format!("v{i}"), now); }
                    Step::Delete => { let _ = record.mark_deleted(now); }
                    Step::Fail(retryable) => { let _ = record.record_failure("x", retryable, 5, now); }
                    Step::Succeed => { let _ = record.record_success(&ServerAck::new("S", now), now); }
                    Step::Rebase => record.rebase_on_ack(&ServerAck::new("S", now), now),
                    Step::Retry => { let _ = record.retry_now(); }
                    Step::Remote => record.apply_remote(format!("r{i}"), now),
                }
                prop_assert!(record.check_invariants().is_ok());
                prop_assert_eq!(record.needs_sync(), record.sync_state() != SyncState::Ok);
                if record.sync_state() == SyncState::Ok {
                    prop_assert_eq!(record.sync_attempts(), 0);
                    prop_assert!(record.last_sync_error().is_none());
                }
            }
        }
    }
}
