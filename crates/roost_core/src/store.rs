//! The local store contract.

use crate::entity::Entity;
use crate::error::CoreResult;
use crate::record::{SyncState, SyncableRecord};
use crate::types::{EntityType, RecordId, Timestamp};

/// Result of a read-modify-write closure passed to [`RecordStore::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction<T> {
    /// Leave the table untouched.
    Keep,
    /// Store this record. If its id differs from the one the update was
    /// addressed to, the record is re-keyed in the same commit.
    Put(SyncableRecord<T>),
    /// Drop the record.
    Remove,
}

/// Per-entity-type persistent table of syncable records.
///
/// Every method is atomic with respect to every other method on the same
/// table. In particular the closure passed to [`RecordStore::update`] runs
/// under the table's write lock, so a sync outcome can never interleave with
/// a local edit of the same record.
pub trait RecordStore<T: Entity>: Send + Sync {
    /// The entity type this table holds.
    fn entity_type(&self) -> &EntityType;

    /// Current time according to the store's clock.
    fn now(&self) -> Timestamp;

    /// Fetches one record.
    fn get(&self, id: &RecordId) -> CoreResult<Option<SyncableRecord<T>>>;

    /// Returns every record matching `predicate`, ordered by id.
    fn get_all_matching<P>(&self, predicate: P) -> CoreResult<Vec<SyncableRecord<T>>>
    where
        P: Fn(&SyncableRecord<T>) -> bool;

    /// Inserts or replaces a record.
    ///
    /// Replacing a record that still needs sync requires the caller to carry
    /// its current revision.
    ///
    /// # Errors
    ///
    /// [`crate::CoreError::StaleWrite`] if the stored record needs sync and
    /// `record.revision()` differs from the stored revision.
    fn upsert(&self, record: SyncableRecord<T>) -> CoreResult<SyncableRecord<T>>;

    /// Drops a record regardless of its state. Returns false if it was absent.
    fn delete(&self, id: &RecordId) -> CoreResult<bool>;

    /// Atomic read-modify-write of one record.
    ///
    /// `f` sees the current record (or `None`) and decides what to store.
    /// Returns the record as stored afterwards, `None` if absent.
    fn update<F>(&self, id: &RecordId, f: F) -> CoreResult<Option<SyncableRecord<T>>>
    where
        F: FnOnce(Option<&SyncableRecord<T>>) -> CoreResult<UpdateAction<T>>;

    /// Every record.
    fn get_all(&self) -> CoreResult<Vec<SyncableRecord<T>>> {
        self.get_all_matching(|_| true)
    }

    /// Records with unconfirmed local changes, oldest local change first.
    fn get_unsynced(&self) -> CoreResult<Vec<SyncableRecord<T>>> {
        let mut records = self.get_all_matching(SyncableRecord::needs_sync)?;
        records.sort_by(|a, b| {
            a.last_client_update()
                .cmp(&b.last_client_update())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(records)
    }

    /// Pull watermark: the newest server timestamp among synced records.
    fn latest_server_timestamp(&self) -> CoreResult<Option<Timestamp>> {
        let synced = self.get_by_state(SyncState::Ok)?;
        Ok(synced
            .iter()
            .filter_map(SyncableRecord::server_last_updated)
            .max())
    }

    /// Records in a given state.
    fn get_by_state(&self, state: SyncState) -> CoreResult<Vec<SyncableRecord<T>>> {
        self.get_all_matching(|r| r.sync_state() == state)
    }

    /// Failed records excluded from automatic retry.
    fn needing_attention(&self) -> CoreResult<Vec<SyncableRecord<T>>> {
        self.get_all_matching(SyncableRecord::needs_attention)
    }
}
