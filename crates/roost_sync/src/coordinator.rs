//! Per-entity-type sync passes.
//!
//! A pass drains the table's pending records through the gateway, then pulls
//! remote changes and runs each one through the resolver:
//!
//! ```text
//! Idle ──► Pushing ──► Pulling ──► Idle
//! ```
//!
//! Gateway calls happen without any store lock held. Each outcome is written
//! back through [`RecordStore::update`], which re-reads the record, so a
//! local edit made while a push was in flight is never lost.

use crate::config::SyncConfig;
use crate::error::{GatewayError, SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use crate::policy::{AttemptDecision, RetryPolicy};
use crate::resolver::{resolve, ResolvedAction};
use parking_lot::{Mutex, RwLock};
use roost_core::{
    Entity, EntityType, FailureKind, PendingOp, RecordId, RecordStore, ServerAck, SyncableRecord,
    Timestamp, UpdateAction,
};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Phase of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No pass running.
    Idle,
    /// Pushing pending records.
    Pushing,
    /// Pulling and resolving remote changes.
    Pulling,
}

/// Counters for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Records pushed to the gateway.
    pub attempted: usize,
    /// Pushes the server confirmed, deletions included.
    pub pushed: usize,
    /// Pushes that failed or were refused before sending.
    pub failed: usize,
    /// Records left for an operator.
    pub skipped: usize,
    /// Records still inside their backoff window.
    pub deferred: usize,
    /// Remote records received.
    pub pulled: usize,
    /// Remote records written locally (inserted or overwritten).
    pub applied: usize,
    /// Local records removed because the server deleted them.
    pub removed: usize,
    /// Remote changes held back because local edits are pending.
    pub conflicts_deferred: usize,
    /// Wall time of the pass.
    pub duration: Duration,
}

/// A per-record problem that did not abort the pass.
#[derive(Debug, Clone, PartialEq)]
pub enum PassError {
    /// A push failed; the record is now in `Error`.
    Push {
        /// The record.
        record_id: RecordId,
        /// How the failure was classified.
        kind: FailureKind,
        /// Failure message.
        message: String,
    },
    /// A record was not attempted because its backoff has not elapsed.
    Deferred {
        /// The record.
        record_id: RecordId,
        /// Earliest next attempt.
        until: Timestamp,
    },
    /// The outcome of a push could not be written back.
    Outcome {
        /// The record.
        record_id: RecordId,
        /// What went wrong.
        message: String,
    },
    /// The pull failed; pushes made in this pass stand.
    Pull(GatewayError),
}

/// Outcome of one sync pass.
#[derive(Debug)]
pub enum PassResult {
    /// Every pending record was handled and the pull succeeded.
    Success(PassReport),
    /// The pass ran to the end but some records or the pull failed.
    PartialFailure {
        /// Counters.
        report: PassReport,
        /// What went wrong.
        errors: Vec<PassError>,
    },
    /// The pass was aborted or never started.
    Failure(SyncError),
}

impl PassResult {
    /// Returns true for [`PassResult::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The pass counters, unless the pass was aborted.
    pub fn report(&self) -> Option<&PassReport> {
        match self {
            Self::Success(report) | Self::PartialFailure { report, .. } => Some(report),
            Self::Failure(_) => None,
        }
    }

    /// Per-record errors of a partial failure.
    pub fn errors(&self) -> &[PassError] {
        match self {
            Self::PartialFailure { errors, .. } => errors,
            _ => &[],
        }
    }

    /// The error of an aborted pass.
    pub fn failure(&self) -> Option<&SyncError> {
        match self {
            Self::Failure(err) => Some(err),
            _ => None,
        }
    }
}

/// Cumulative statistics of a coordinator.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes run to completion or aborted (overlap rejections excluded).
    pub passes: u64,
    /// Passes that ended in `Success`.
    pub successful_passes: u64,
    /// Passes that ended in `Failure`.
    pub failed_passes: u64,
    /// Confirmed pushes.
    pub pushed: u64,
    /// Remote records received.
    pub pulled: u64,
    /// Failed pushes.
    pub push_failures: u64,
    /// Remote changes held back by pending local edits.
    pub conflicts_deferred: u64,
    /// End of the last pass.
    pub last_pass_at: Option<Timestamp>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Runs sync passes for one entity type.
pub struct SyncCoordinator<T, S, G>
where
    T: Entity,
    S: RecordStore<T>,
    G: RemoteGateway<T>,
{
    entity_type: EntityType,
    store: Arc<S>,
    gateway: Arc<G>,
    policy: RetryPolicy,
    phase: RwLock<SyncPhase>,
    lease: Mutex<()>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    held_watermark: Mutex<Option<Option<Timestamp>>>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, S, G> SyncCoordinator<T, S, G>
where
    T: Entity,
    S: RecordStore<T>,
    G: RemoteGateway<T>,
{
    /// Creates a coordinator for the store's entity type.
    pub fn new(store: Arc<S>, gateway: Arc<G>, config: &SyncConfig) -> Self {
        Self {
            entity_type: store.entity_type().clone(),
            store,
            gateway,
            policy: RetryPolicy::new(config.retry.clone(), config.record_pacing),
            phase: RwLock::new(SyncPhase::Idle),
            lease: Mutex::new(()),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
            held_watermark: Mutex::new(None),
            _payload: PhantomData,
        }
    }

    /// The entity type this coordinator syncs.
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// The local table.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Asks the running pass to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.write() = phase;
    }

    /// Runs one push-then-pull pass.
    ///
    /// Returns [`SyncError::PassInProgress`] at once if another pass for
    /// this entity type is running.
    pub fn run_pass(&self) -> PassResult {
        let Some(_lease) = self.lease.try_lock() else {
            debug!(entity_type = %self.entity_type, "pass already running");
            return PassResult::Failure(SyncError::PassInProgress {
                entity_type: self.entity_type.clone(),
            });
        };
        self.cancelled.store(false, Ordering::SeqCst);

        let start = Instant::now();
        let mut report = PassReport::default();
        let mut errors = Vec::new();

        let outcome = self.pass_watermark().and_then(|watermark| {
            let pulled = self
                .push_pending(&mut report, &mut errors)
                .and_then(|()| self.pull_remote(watermark, &mut report, &mut errors));
            if !matches!(pulled, Ok(true)) {
                *self.held_watermark.lock() = Some(watermark);
            }
            pulled.map(|_| ())
        });
        self.set_phase(SyncPhase::Idle);
        report.duration = start.elapsed();

        let result = match outcome {
            Err(err) => {
                error!(entity_type = %self.entity_type, error = %err, "sync pass aborted");
                PassResult::Failure(err)
            }
            Ok(()) if errors.is_empty() => PassResult::Success(report),
            Ok(()) => PassResult::PartialFailure { report, errors },
        };

        if let Some(report) = result.report() {
            info!(
                entity_type = %self.entity_type,
                pushed = report.pushed,
                failed = report.failed,
                skipped = report.skipped,
                deferred = report.deferred,
                pulled = report.pulled,
                applied = report.applied,
                removed = report.removed,
                conflicts = report.conflicts_deferred,
                success = result.is_success(),
                "sync pass finished"
            );
        }
        self.record_stats(&result);
        result
    }

    /// The pull watermark for this pass.
    ///
    /// Read before anything is pushed, so acknowledgements from this pass
    /// cannot hide older remote changes. A watermark whose pull never
    /// completed is held and reused.
    fn pass_watermark(&self) -> SyncResult<Option<Timestamp>> {
        let current = self.store.latest_server_timestamp()?;
        // `None` asks for everything and orders lowest.
        Ok(match self.held_watermark.lock().take() {
            Some(held) => held.min(current),
            None => current,
        })
    }

    fn push_pending(&self, report: &mut PassReport, errors: &mut Vec<PassError>) -> SyncResult<()> {
        self.set_phase(SyncPhase::Pushing);
        let pending = self.store.get_unsynced()?;
        debug!(entity_type = %self.entity_type, pending = pending.len(), "pushing");

        for record in pending {
            self.check_cancelled()?;

            match self.policy.decide(&record, self.store.now()) {
                AttemptDecision::Attempt => {}
                AttemptDecision::Skip => {
                    report.skipped += 1;
                    continue;
                }
                AttemptDecision::Defer { until } => {
                    debug!(record_id = %record.id(), %until, "deferred by backoff");
                    report.deferred += 1;
                    errors.push(PassError::Deferred {
                        record_id: record.id().clone(),
                        until,
                    });
                    continue;
                }
            }

            if record.pending_op() != Some(PendingOp::Delete) {
                if let Err(invalid) = record.payload().validate() {
                    self.write_failure(&record, invalid.to_string(), false, report, errors)?;
                    continue;
                }
            }

            report.attempted += 1;
            let pushed = self.gateway.push(&self.entity_type, &record);
            let written = match pushed {
                Ok(ack) => self.write_success(&record, &ack, report),
                Err(GatewayError::NotFound { .. })
                    if record.pending_op() == Some(PendingOp::Delete) =>
                {
                    // Already gone on the server.
                    let ack = ServerAck::new(
                        record.id().clone(),
                        record.server_last_updated().unwrap_or_default(),
                    );
                    self.write_success(&record, &ack, report)
                }
                Err(err) => {
                    let retryable = RetryPolicy::is_retryable(&err);
                    self.write_failure(&record, err.to_string(), retryable, report, errors)
                }
            };

            match written {
                Ok(()) => {}
                Err(SyncError::Store(err)) if err.is_usage_error() => {
                    warn!(record_id = %record.id(), error = %err, "push outcome not recorded");
                    errors.push(PassError::Outcome {
                        record_id: record.id().clone(),
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn write_success(
        &self,
        pushed: &SyncableRecord<T>,
        ack: &ServerAck,
        report: &mut PassReport,
    ) -> SyncResult<()> {
        let now = self.store.now();
        let op = pushed.pending_op();
        if op == Some(PendingOp::Create)
            && ack.server_id != *pushed.id()
            && self.store.get(&ack.server_id)?.is_some()
        {
            return self.fold_into_server_copy(pushed, ack, report);
        }
        self.store.update(pushed.id(), |current| {
            let Some(current) = current else {
                // Purged locally while the create was in flight.
                return Ok(match op {
                    Some(PendingOp::Create) => UpdateAction::Put(
                        SyncableRecord::pending_remote_delete(ack, pushed.payload().clone(), now),
                    ),
                    _ => UpdateAction::Keep,
                });
            };
            if op == Some(PendingOp::Delete) && current.pending_op() == Some(PendingOp::Delete) {
                return Ok(UpdateAction::Remove);
            }
            let mut next = current.clone();
            if current.revision() == pushed.revision() {
                next.record_success(ack, now)?;
            } else {
                next.rebase_on_ack(ack, now);
            }
            Ok(UpdateAction::Put(next))
        })?;

        report.pushed += 1;
        debug!(
            entity_type = %self.entity_type,
            record_id = %pushed.id(),
            server_id = %ack.server_id,
            "push confirmed"
        );
        Ok(())
    }

    /// Handles an acknowledged create whose server copy is already stored.
    ///
    /// An earlier acknowledgement was lost and a pull brought the record in
    /// under its server id. The client-id row is dropped. A change made to
    /// it after the push is carried over to the server copy, unless that
    /// copy holds a newer local change of its own.
    fn fold_into_server_copy(
        &self,
        pushed: &SyncableRecord<T>,
        ack: &ServerAck,
        report: &mut PassReport,
    ) -> SyncResult<()> {
        let mut carried = None;
        self.store.update(pushed.id(), |current| {
            let Some(current) = current else {
                return Ok(UpdateAction::Keep);
            };
            if current.revision() != pushed.revision() {
                carried = Some(current.clone());
            }
            Ok(UpdateAction::Remove)
        })?;

        if let Some(newer) = carried {
            self.store.update(&ack.server_id, |server_copy| {
                let mut next = match server_copy {
                    Some(copy) if copy.pending_op() == Some(PendingOp::Delete) => {
                        return Ok(UpdateAction::Keep);
                    }
                    Some(copy)
                        if copy.needs_sync()
                            && copy.last_client_update() >= newer.last_client_update() =>
                    {
                        return Ok(UpdateAction::Keep);
                    }
                    Some(copy) => copy.clone(),
                    None => SyncableRecord::synced(
                        ack.server_id.clone(),
                        pushed.payload().clone(),
                        ack.server_last_updated,
                    ),
                };
                next.edit(newer.payload().clone(), newer.last_client_update())?;
                Ok(UpdateAction::Put(next))
            })?;
        }

        report.pushed += 1;
        debug!(
            entity_type = %self.entity_type,
            record_id = %pushed.id(),
            server_id = %ack.server_id,
            "push confirmed, folded into stored server copy"
        );
        Ok(())
    }

    fn write_failure(
        &self,
        pushed: &SyncableRecord<T>,
        message: String,
        retryable: bool,
        report: &mut PassReport,
        errors: &mut Vec<PassError>,
    ) -> SyncResult<()> {
        let now = self.store.now();
        let max_attempts = self.policy.max_attempts();
        let mut outcome = None;
        self.store.update(pushed.id(), |current| {
            let Some(current) = current.filter(|r| r.needs_sync()) else {
                return Ok(UpdateAction::Keep);
            };
            let mut next = current.clone();
            let kind = next.record_failure(message.clone(), retryable, max_attempts, now)?;
            outcome = Some((kind, next.sync_attempts()));
            Ok(UpdateAction::Put(next))
        })?;

        let Some((kind, attempts)) = outcome else {
            return Ok(());
        };
        report.failed += 1;
        match kind {
            FailureKind::Retryable => warn!(
                entity_type = %self.entity_type,
                record_id = %pushed.id(),
                attempts,
                error = %message,
                "push failed, will retry"
            ),
            FailureKind::Exhausted => warn!(
                entity_type = %self.entity_type,
                record_id = %pushed.id(),
                attempts,
                error = %message,
                "push failed, retries exhausted"
            ),
            FailureKind::Terminal => error!(
                entity_type = %self.entity_type,
                record_id = %pushed.id(),
                error = %message,
                "push rejected"
            ),
        }
        errors.push(PassError::Push {
            record_id: pushed.id().clone(),
            kind,
            message,
        });
        Ok(())
    }

    /// Returns whether every remote change was received and resolved.
    fn pull_remote(
        &self,
        watermark: Option<Timestamp>,
        report: &mut PassReport,
        errors: &mut Vec<PassError>,
    ) -> SyncResult<bool> {
        self.check_cancelled()?;
        self.set_phase(SyncPhase::Pulling);
        debug!(entity_type = %self.entity_type, watermark = ?watermark, "pulling");

        let remote = match self.gateway.pull_since(&self.entity_type, watermark) {
            Ok(remote) => remote,
            Err(err) => {
                warn!(entity_type = %self.entity_type, error = %err, "pull failed");
                errors.push(PassError::Pull(err));
                return Ok(false);
            }
        };
        report.pulled = remote.len();

        for item in remote {
            self.check_cancelled()?;
            let mut decision = None;
            self.store.update(&item.id, |local| {
                let action = resolve(local, Some(&item));
                decision = Some(match &action {
                    ResolvedAction::KeepLocal { diverged } => Resolved::Kept(*diverged),
                    ResolvedAction::NoChange => Resolved::Unchanged,
                    ResolvedAction::Overwrite(_) | ResolvedAction::Insert(_) => Resolved::Applied,
                    ResolvedAction::Delete => Resolved::Removed,
                });
                Ok(action.into_update())
            })?;

            match decision {
                Some(Resolved::Applied) => report.applied += 1,
                Some(Resolved::Removed) => report.removed += 1,
                Some(Resolved::Kept(true)) => {
                    debug!(record_id = %item.id, "remote change deferred by pending local edit");
                    report.conflicts_deferred += 1;
                }
                Some(Resolved::Kept(false) | Resolved::Unchanged) | None => {}
            }
        }
        Ok(true)
    }

    fn record_stats(&self, result: &PassResult) {
        let mut stats = self.stats.write();
        stats.passes += 1;
        stats.last_pass_at = Some(self.store.now());
        match result {
            PassResult::Success(_) => stats.successful_passes += 1,
            PassResult::PartialFailure { errors, .. } => {
                if let Some(last) = errors.iter().rev().find_map(describe) {
                    stats.last_error = Some(last);
                }
            }
            PassResult::Failure(err) => {
                stats.failed_passes += 1;
                stats.last_error = Some(err.to_string());
            }
        }
        if let Some(report) = result.report() {
            stats.pushed += report.pushed as u64;
            stats.pulled += report.pulled as u64;
            stats.push_failures += report.failed as u64;
            stats.conflicts_deferred += report.conflicts_deferred as u64;
        }
    }
}

enum Resolved {
    Kept(bool),
    Unchanged,
    Applied,
    Removed,
}

fn describe(error: &PassError) -> Option<String> {
    match error {
        PassError::Push { message, .. } | PassError::Outcome { message, .. } => {
            Some(message.clone())
        }
        PassError::Pull(err) => Some(err.to_string()),
        PassError::Deferred { .. } => None,
    }
}
