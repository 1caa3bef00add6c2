//! Persisted row schema.
//!
//! Every journal entry carries rows in this shape, CBOR-encoded. Decoding
//! rebuilds the record's closed state from the flat columns and rejects
//! rows whose columns contradict each other.

use crate::error::{CoreError, CoreResult};
use crate::record::{FailureKind, PendingOp, Status, SyncState, SyncableRecord};
use crate::types::{RecordId, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct RowRef<'a, T> {
    id: &'a RecordId,
    payload: &'a T,
    last_client_update: Timestamp,
    server_last_updated: Option<Timestamp>,
    needs_sync: bool,
    sync_state: SyncState,
    pending_op: Option<PendingOp>,
    failure_kind: Option<FailureKind>,
    last_sync_error: Option<&'a str>,
    sync_attempts: u32,
    last_attempt_at: Option<Timestamp>,
    revision: u64,
}

impl<'a, T> RowRef<'a, T> {
    fn new(record: &'a SyncableRecord<T>) -> Self {
        Self {
            id: &record.id,
            payload: &record.payload,
            last_client_update: record.last_client_update,
            server_last_updated: record.server_last_updated,
            needs_sync: record.needs_sync(),
            sync_state: record.sync_state(),
            pending_op: record.pending_op(),
            failure_kind: record.failure_kind(),
            last_sync_error: record.last_sync_error.as_deref(),
            sync_attempts: record.sync_attempts,
            last_attempt_at: record.last_attempt_at,
            revision: record.revision,
        }
    }
}

#[derive(Deserialize)]
struct StoredRow<T> {
    id: RecordId,
    payload: T,
    last_client_update: Timestamp,
    #[serde(default)]
    server_last_updated: Option<Timestamp>,
    needs_sync: bool,
    #[serde(default)]
    sync_state: SyncState,
    #[serde(default)]
    pending_op: Option<PendingOp>,
    #[serde(default)]
    failure_kind: Option<FailureKind>,
    #[serde(default)]
    last_sync_error: Option<String>,
    #[serde(default)]
    sync_attempts: u32,
    #[serde(default)]
    last_attempt_at: Option<Timestamp>,
    #[serde(default)]
    revision: u64,
}

impl<T> StoredRow<T> {
    fn into_record(self) -> CoreResult<SyncableRecord<T>> {
        if self.needs_sync != self.sync_state.needs_sync() {
            return Err(CoreError::invalid_format(format!(
                "row {}: needs_sync={} contradicts state {}",
                self.id, self.needs_sync, self.sync_state
            )));
        }
        let status = match (self.sync_state, self.pending_op, self.failure_kind) {
            (SyncState::Ok, None, None) => Status::Synced,
            (SyncState::Error, Some(op), Some(kind)) => Status::Failed { op, kind },
            (state, Some(op), None) if op.state() == state => Status::Pending(op),
            (state, op, kind) => {
                return Err(CoreError::invalid_format(format!(
                    "row {}: state {state} with pending op {op:?} and failure {kind:?}",
                    self.id
                )))
            }
        };
        let record = SyncableRecord {
            id: self.id,
            payload: self.payload,
            last_client_update: self.last_client_update,
            server_last_updated: self.server_last_updated,
            status,
            last_sync_error: self.last_sync_error,
            sync_attempts: self.sync_attempts,
            last_attempt_at: self.last_attempt_at,
            revision: self.revision,
        };
        record.check_invariants().map_err(CoreError::invalid_format)?;
        Ok(record)
    }
}

/// A committed change to one table, as written to its journal.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Mutation<T> {
    /// Insert or replace a record.
    Put(SyncableRecord<T>),
    /// Drop a record.
    Remove(RecordId),
    /// Move a record to a new id and replace it, in one step.
    Rekey {
        from: RecordId,
        record: SyncableRecord<T>,
    },
}

#[derive(Serialize)]
enum MutationRef<'a, T> {
    Put(RowRef<'a, T>),
    Remove(&'a RecordId),
    Rekey { from: &'a RecordId, row: RowRef<'a, T> },
}

#[derive(Deserialize)]
enum StoredMutation<T> {
    Put(StoredRow<T>),
    Remove(RecordId),
    Rekey { from: RecordId, row: StoredRow<T> },
}

impl<T: Serialize + DeserializeOwned> Mutation<T> {
    /// Encodes the mutation as CBOR.
    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        let value = match self {
            Self::Put(record) => MutationRef::Put(RowRef::new(record)),
            Self::Remove(id) => MutationRef::Remove(id),
            Self::Rekey { from, record } => MutationRef::Rekey {
                from,
                row: RowRef::new(record),
            },
        };
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&value, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a mutation, validating any row it carries.
    pub(crate) fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let stored: StoredMutation<T> =
            ciborium::de::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(match stored {
            StoredMutation::Put(row) => Self::Put(row.into_record()?),
            StoredMutation::Remove(id) => Self::Remove(id),
            StoredMutation::Rekey { from, row } => Self::Rekey {
                from,
                record: row.into_record()?,
            },
        })
    }
}
