//! Test fixtures and store helpers.

use roost_core::{ManualClock, StoreConfig, SyncStore, Timestamp};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Client clock start used by every fixture.
pub const TEST_EPOCH: Timestamp = Timestamp::from_millis(1_700_000_000_000);

/// A store with a manual clock and automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: SyncStore,
    clock: Arc<ManualClock>,
    config: StoreConfig,
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates an in-memory store.
    pub fn memory() -> Self {
        Self::memory_with(StoreConfig::default())
    }

    /// Creates an in-memory store with `config`.
    pub fn memory_with(config: StoreConfig) -> Self {
        let clock = Arc::new(ManualClock::new(TEST_EPOCH));
        Self {
            store: SyncStore::in_memory_with(config.clone()).with_clock(clock.clone()),
            clock,
            config,
            temp_dir: None,
        }
    }

    /// Creates a store in a fresh temporary directory.
    pub fn file() -> Self {
        Self::file_with(StoreConfig::default())
    }

    /// Creates a file-backed store with `config`.
    pub fn file_with(config: StoreConfig) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let clock = Arc::new(ManualClock::new(TEST_EPOCH));
        let store = SyncStore::open(temp_dir.path().join("store"), config.clone())
            .expect("failed to open file store")
            .with_clock(clock.clone());
        Self {
            store,
            clock,
            config,
            temp_dir: Some(temp_dir),
        }
    }

    /// Closes and reopens a file-backed store, keeping the clock.
    ///
    /// Everything the journals hold is replayed; in-memory stores come back
    /// empty.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            clock,
            config,
            temp_dir,
        } = self;
        drop(store);
        let store = match &temp_dir {
            Some(dir) => SyncStore::open(dir.path().join("store"), config.clone())
                .expect("failed to reopen file store"),
            None => SyncStore::in_memory_with(config.clone()),
        };
        Self {
            store: store.with_clock(clock.clone()),
            clock,
            config,
            temp_dir,
        }
    }

    /// The store directory, for file-backed stores.
    pub fn path(&self) -> Option<&Path> {
        self.store.path()
    }

    /// The manual clock driving the store.
    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

impl std::ops::Deref for TestStore {
    type Target = SyncStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with an in-memory store.
pub fn with_test_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::memory();
    f(&store)
}

/// Runs a test with a file-backed store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore, &Path) -> R,
{
    let store = TestStore::file();
    let path = store
        .path()
        .expect("file store should have a path")
        .to_path_buf();
    f(&store, &path)
}
