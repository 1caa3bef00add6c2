//! The store: a directory of typed tables.

use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::table::Table;
use crate::types::{Clock, EntityType, SystemClock};
use parking_lot::Mutex;
use roost_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

type AnyTable = Arc<dyn Any + Send + Sync>;

/// Local store holding one [`Table`] per entity type.
///
/// On disk a store is a locked directory with one journal per table. Tables
/// are opened lazily on first access and cached, so repeated calls to
/// [`SyncStore::table`] return the same instance.
///
/// ```rust
/// use roost_core::{RecordStore, StoreConfig, SyncStore};
/// # use roost_core::Entity;
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// # struct Note(String);
/// # impl Entity for Note { const ENTITY_TYPE: &'static str = "note"; }
///
/// let dir = tempfile::tempdir().unwrap();
/// let id = {
///     let store = SyncStore::open(dir.path(), StoreConfig::default()).unwrap();
///     let notes = store.table::<Note>().unwrap();
///     notes.create(Note("offline".into())).unwrap().id().clone()
/// };
///
/// let store = SyncStore::open(dir.path(), StoreConfig::default()).unwrap();
/// let notes = store.table::<Note>().unwrap();
/// assert!(notes.get(&id).unwrap().unwrap().needs_sync());
/// ```
pub struct SyncStore {
    dir: Option<StoreDir>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    tables: Mutex<HashMap<EntityType, AnyTable>>,
}

impl SyncStore {
    /// Opens (or creates) a store directory.
    ///
    /// # Errors
    ///
    /// [`CoreError::StoreLocked`] if another handle has the directory open.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> CoreResult<Self> {
        let dir = StoreDir::open(path.as_ref(), config.create_if_missing)?;
        Ok(Self {
            dir: Some(dir),
            config,
            clock: Arc::new(SystemClock),
            tables: Mutex::new(HashMap::new()),
        })
    }

    /// Creates a store that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self::in_memory_with(StoreConfig::default())
    }

    /// Creates an in-memory store with a custom configuration.
    pub fn in_memory_with(config: StoreConfig) -> Self {
        Self {
            dir: None,
            config,
            clock: Arc::new(SystemClock),
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the clock used to stamp local mutations.
    ///
    /// Affects tables opened afterwards.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The store's clock.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// The store directory, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// Returns the table for `T`, opening it on first use.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidEntityType`] if `T::ENTITY_TYPE` is not a valid name
    /// - [`CoreError::EntityTypeMismatch`] if another payload type already
    ///   claimed the name
    /// - storage and decode errors while replaying the journal
    pub fn table<T: Entity>(&self) -> CoreResult<Arc<Table<T>>> {
        let entity_type = EntityType::new(T::ENTITY_TYPE);
        if !entity_type.is_valid() {
            return Err(CoreError::InvalidEntityType {
                name: T::ENTITY_TYPE.to_string(),
            });
        }

        let mut tables = self.tables.lock();
        if let Some(existing) = tables.get(&entity_type) {
            return Arc::clone(existing)
                .downcast::<Table<T>>()
                .map_err(|_| CoreError::EntityTypeMismatch {
                    name: T::ENTITY_TYPE.to_string(),
                });
        }

        let backend: Box<dyn StorageBackend> = match &self.dir {
            Some(dir) => Box::new(FileBackend::open(&dir.journal_path(&entity_type))?),
            None => Box::new(InMemoryBackend::new()),
        };
        let table = Arc::new(Table::<T>::open(
            entity_type.clone(),
            backend,
            &self.config,
            Arc::clone(&self.clock),
        )?);
        tables.insert(entity_type, Arc::clone(&table) as AnyTable);
        Ok(table)
    }

    /// Entity types whose tables are currently open.
    pub fn open_tables(&self) -> Vec<EntityType> {
        let mut names: Vec<_> = self.tables.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Entity types with a journal on disk, opened or not.
    pub fn stored_tables(&self) -> CoreResult<Vec<EntityType>> {
        match &self.dir {
            Some(dir) => dir.existing_tables(),
            None => Ok(self.open_tables()),
        }
    }
}

impl std::fmt::Debug for SyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStore")
            .field("path", &self.path())
            .field("tables", &self.open_tables())
            .finish()
    }
}
