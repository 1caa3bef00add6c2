//! Journaled per-entity-type tables.

use crate::change_feed::{ChangeEvent, ChangeFeed, ChangeKind};
use crate::config::StoreConfig;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::journal::{encode_frame, FrameKind, Journal};
use crate::record::{DeleteDisposition, SyncState, SyncableRecord};
use crate::row::Mutation;
use crate::store::{RecordStore, UpdateAction};
use crate::types::{Clock, EntityType, RecordId, Timestamp};
use parking_lot::RwLock;
use roost_storage::StorageBackend;
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct TableState<T> {
    records: BTreeMap<RecordId, SyncableRecord<T>>,
    journal: Journal,
    /// Journal size right after the last compaction (or open).
    compacted_size: u64,
}

/// The local table for one entity type.
///
/// Records live in memory and every committed write is appended to the
/// table's journal before it becomes visible. Reads share a lock; writes,
/// including the closure of [`RecordStore::update`], take it exclusively.
///
/// Besides the [`RecordStore`] contract a table offers the local mutation
/// helpers UI code uses ([`Table::create`], [`Table::edit`],
/// [`Table::remove`]) and the operator actions [`Table::retry_now`] and
/// [`Table::abandon`].
pub struct Table<T: Entity> {
    entity_type: EntityType,
    state: RwLock<TableState<T>>,
    feed: ChangeFeed,
    clock: Arc<dyn Clock>,
    compact_threshold: u64,
}

impl<T: Entity> Table<T> {
    /// Opens a table over `backend`, replaying its journal.
    ///
    /// # Errors
    ///
    /// Fails if the journal cannot be read or holds a row that does not
    /// decode. A torn tail is truncated, not reported.
    pub fn open(
        entity_type: EntityType,
        backend: Box<dyn StorageBackend>,
        config: &StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let mut journal = Journal::new(backend, config.sync_on_write);
        let mut records = BTreeMap::new();
        for (kind, payload) in journal.replay(entity_type.as_str())? {
            match kind {
                FrameKind::Mutation => {
                    apply(&mut records, Mutation::<T>::decode(&payload)?);
                }
            }
        }
        let compacted_size = journal.size()?;
        info!(
            table = %entity_type,
            records = records.len(),
            journal_bytes = compacted_size,
            "table opened"
        );

        Ok(Self {
            entity_type,
            state: RwLock::new(TableState {
                records,
                journal,
                compacted_size,
            }),
            feed: ChangeFeed::with_max_history(config.change_history),
            clock,
            compact_threshold: config.compact_threshold_bytes,
        })
    }

    /// Number of records, including ones pending deletion.
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// Returns true if the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribes to committed changes of this table.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// The table's change feed.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Creates a record locally with a fresh client id.
    pub fn create(&self, payload: T) -> CoreResult<SyncableRecord<T>> {
        self.create_with_id(RecordId::generate(), payload)
    }

    /// Creates a record locally under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// [`CoreError::IdConflict`] if the id is taken.
    pub fn create_with_id(&self, id: RecordId, payload: T) -> CoreResult<SyncableRecord<T>> {
        let now = self.clock.now();
        let created = self.update(&id, |current| match current {
            Some(_) => Err(CoreError::IdConflict { id: id.clone() }),
            None => Ok(UpdateAction::Put(SyncableRecord::new_local(
                id.clone(),
                payload,
                now,
            ))),
        })?;
        created.ok_or_else(|| CoreError::not_found(self.entity_type.as_str(), id))
    }

    /// Replaces a record's payload with a local edit.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if absent, [`CoreError::RecordDeleted`] if
    /// pending deletion.
    pub fn edit(&self, id: &RecordId, payload: T) -> CoreResult<SyncableRecord<T>> {
        let now = self.clock.now();
        let edited = self.update(id, |current| {
            let mut record = self.require(id, current)?;
            record.edit(payload, now)?;
            Ok(UpdateAction::Put(record))
        })?;
        edited.ok_or_else(|| CoreError::not_found(self.entity_type.as_str(), id.clone()))
    }

    /// Deletes a record locally.
    ///
    /// Records the server never saw are dropped at once and `None` is
    /// returned; others are kept as `PendingDelete` until the server confirms.
    pub fn remove(&self, id: &RecordId) -> CoreResult<Option<SyncableRecord<T>>> {
        let now = self.clock.now();
        self.update(id, |current| {
            let mut record = self.require(id, current)?;
            Ok(match record.mark_deleted(now) {
                DeleteDisposition::Purge => UpdateAction::Remove,
                DeleteDisposition::Pending => UpdateAction::Put(record),
            })
        })
    }

    /// Operator action: clears a failed record's streak so the next pass
    /// pushes it again.
    pub fn retry_now(&self, id: &RecordId) -> CoreResult<SyncableRecord<T>> {
        let retried = self.update(id, |current| {
            let mut record = self.require(id, current)?;
            record.retry_now()?;
            Ok(UpdateAction::Put(record))
        })?;
        retried.ok_or_else(|| CoreError::not_found(self.entity_type.as_str(), id.clone()))
    }

    /// Operator action: drops a failed record and returns it.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTransition`] unless the record is in `Error`.
    pub fn abandon(&self, id: &RecordId) -> CoreResult<SyncableRecord<T>> {
        let mut abandoned = None;
        self.update(id, |current| {
            let record = self.require(id, current)?;
            if record.sync_state() != SyncState::Error {
                return Err(CoreError::invalid_transition(
                    id.clone(),
                    record.sync_state(),
                    "abandon",
                ));
            }
            abandoned = Some(record);
            Ok(UpdateAction::Remove)
        })?;
        let record =
            abandoned.ok_or_else(|| CoreError::not_found(self.entity_type.as_str(), id.clone()))?;
        info!(table = %self.entity_type, record_id = %id, "abandoned failed record");
        Ok(record)
    }

    /// Rewrites the journal as one entry per live record.
    pub fn compact(&self) -> CoreResult<()> {
        let mut state = self.state.write();
        self.compact_locked(&mut state)
    }

    /// Current journal size in bytes.
    pub fn journal_size(&self) -> CoreResult<u64> {
        self.state.read().journal.size()
    }

    fn require(
        &self,
        id: &RecordId,
        current: Option<&SyncableRecord<T>>,
    ) -> CoreResult<SyncableRecord<T>> {
        current
            .cloned()
            .ok_or_else(|| CoreError::not_found(self.entity_type.as_str(), id.clone()))
    }

    fn commit(&self, state: &mut TableState<T>, mutation: Mutation<T>) -> CoreResult<()> {
        let frame = encode_frame(FrameKind::Mutation, &mutation.encode()?)?;
        state.journal.append(&frame)?;
        let (id, kind) = apply(&mut state.records, mutation);

        let size = state.journal.size()?;
        if size > self.compact_threshold && size > state.compacted_size.saturating_mul(2) {
            // The mutation is already durable; a failed compaction is retried
            // on a later commit.
            if let Err(err) = self.compact_locked(state) {
                warn!(table = %self.entity_type, error = %err, "journal compaction failed");
            }
        }

        self.feed.emit(id, kind);
        Ok(())
    }

    fn compact_locked(&self, state: &mut TableState<T>) -> CoreResult<()> {
        let before = state.journal.size()?;
        let mut image = Vec::new();
        for record in state.records.values() {
            let entry = Mutation::Put(record.clone()).encode()?;
            image.extend(encode_frame(FrameKind::Mutation, &entry)?);
        }
        state.journal.rewrite(&image)?;
        state.compacted_size = image.len() as u64;
        debug!(
            table = %self.entity_type,
            before,
            after = state.compacted_size,
            "journal compacted"
        );
        Ok(())
    }
}

/// Applies a mutation to the in-memory index.
fn apply<T>(
    records: &mut BTreeMap<RecordId, SyncableRecord<T>>,
    mutation: Mutation<T>,
) -> (RecordId, ChangeKind) {
    match mutation {
        Mutation::Put(record) => {
            let id = record.id.clone();
            let kind = match records.insert(id.clone(), record) {
                Some(_) => ChangeKind::Updated,
                None => ChangeKind::Inserted,
            };
            (id, kind)
        }
        Mutation::Remove(id) => {
            records.remove(&id);
            (id, ChangeKind::Removed)
        }
        Mutation::Rekey { from, record } => {
            records.remove(&from);
            let id = record.id.clone();
            records.insert(id.clone(), record);
            (id, ChangeKind::Rekeyed { previous: from })
        }
    }
}

impl<T: Entity> RecordStore<T> for Table<T> {
    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn get(&self, id: &RecordId) -> CoreResult<Option<SyncableRecord<T>>> {
        Ok(self.state.read().records.get(id).cloned())
    }

    fn get_all_matching<P>(&self, predicate: P) -> CoreResult<Vec<SyncableRecord<T>>>
    where
        P: Fn(&SyncableRecord<T>) -> bool,
    {
        Ok(self
            .state
            .read()
            .records
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect())
    }

    fn upsert(&self, mut record: SyncableRecord<T>) -> CoreResult<SyncableRecord<T>> {
        let mut state = self.state.write();
        let next_revision = match state.records.get(&record.id) {
            Some(existing) if existing.needs_sync() && existing.revision != record.revision => {
                return Err(CoreError::StaleWrite {
                    id: record.id.clone(),
                    current: existing.revision,
                    given: record.revision,
                });
            }
            Some(existing) => existing.revision + 1,
            None => 1,
        };
        record.revision = next_revision;
        self.commit(&mut state, Mutation::Put(record.clone()))?;
        Ok(record)
    }

    fn delete(&self, id: &RecordId) -> CoreResult<bool> {
        let mut state = self.state.write();
        if !state.records.contains_key(id) {
            return Ok(false);
        }
        self.commit(&mut state, Mutation::Remove(id.clone()))?;
        Ok(true)
    }

    fn update<F>(&self, id: &RecordId, f: F) -> CoreResult<Option<SyncableRecord<T>>>
    where
        F: FnOnce(Option<&SyncableRecord<T>>) -> CoreResult<UpdateAction<T>>,
    {
        let mut state = self.state.write();
        let action = f(state.records.get(id))?;
        let current_revision = state.records.get(id).map(|r| r.revision);

        match action {
            UpdateAction::Keep => Ok(state.records.get(id).cloned()),
            UpdateAction::Remove => {
                if current_revision.is_some() {
                    self.commit(&mut state, Mutation::Remove(id.clone()))?;
                }
                Ok(None)
            }
            UpdateAction::Put(mut record) if record.id == *id => {
                record.revision = current_revision.map_or(1, |r| r + 1);
                self.commit(&mut state, Mutation::Put(record.clone()))?;
                Ok(Some(record))
            }
            UpdateAction::Put(mut record) => {
                let target_revision = match state.records.get(&record.id) {
                    Some(target) if target.needs_sync() => {
                        return Err(CoreError::IdConflict { id: record.id });
                    }
                    Some(target) => target.revision,
                    None => 0,
                };
                record.revision = current_revision.unwrap_or(0).max(target_revision) + 1;
                let mutation = match current_revision {
                    Some(_) => Mutation::Rekey {
                        from: id.clone(),
                        record: record.clone(),
                    },
                    None => Mutation::Put(record.clone()),
                };
                self.commit(&mut state, mutation)?;
                Ok(Some(record))
            }
        }
    }
}

impl<T: Entity> std::fmt::Debug for Table<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("entity_type", &self.entity_type)
            .field("records", &self.len())
            .finish()
    }
}
