//! Crash simulation for journal recovery tests.
//!
//! [`CrashableBackend`] wraps a real backend and stops writing part way
//! through an append, leaving a torn frame behind exactly as a power cut
//! would. Reopening the table over the inner backend's file then exercises
//! tail truncation.
//!
//! ```rust
//! use roost_core::{ManualClock, StoreConfig, Table};
//! use roost_domain::Post;
//! use roost_storage::FileBackend;
//! use roost_testkit::{CrashableBackend, TEST_EPOCH};
//! use std::sync::Arc;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("post.journal");
//! let clock = Arc::new(ManualClock::new(TEST_EPOCH));
//! let config = StoreConfig::default();
//!
//! let file = FileBackend::open(&path).unwrap();
//! let (backend, switch) = CrashableBackend::new(Box::new(file));
//! let posts = Table::<Post>::open("post".into(), Box::new(backend), &config, clock.clone()).unwrap();
//! posts.create(Post::new("u1", "kept")).unwrap();
//! switch.crash_within_next_append(5);
//! assert!(posts.create(Post::new("u1", "torn")).is_err());
//! drop(posts);
//!
//! let file = FileBackend::open(&path).unwrap();
//! let reopened = Table::<Post>::open("post".into(), Box::new(file), &config, clock).unwrap();
//! assert_eq!(reopened.len(), 1);
//! ```

use roost_storage::{StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const NO_CRASH: u64 = u64::MAX;

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

/// Remote control for a [`CrashableBackend`] that has been moved into a
/// table.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<CrashState>,
}

impl CrashSwitch {
    /// Crashes once `bytes` more bytes have been written.
    pub fn crash_after(&self, bytes: u64) {
        let written = self.state.bytes_written.load(Ordering::SeqCst);
        self.state
            .crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Lets `bytes` bytes of the next append through, then crashes.
    pub fn crash_within_next_append(&self, bytes: u64) {
        self.crash_after(bytes);
    }

    /// Makes `flush` and `sync` fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.state.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Returns whether a simulated crash has happened.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Clears every crash condition.
    pub fn reset(&self) {
        self.state.crash_after_bytes.store(NO_CRASH, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_on_sync.store(false, Ordering::SeqCst);
    }
}

/// A storage backend that can be told to die mid-write.
///
/// After the crash point every write fails, the way a dead process writes
/// nothing more.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Wraps `inner` and returns the backend with its switch.
    pub fn new(inner: Box<dyn StorageBackend>) -> (Self, CrashSwitch) {
        let state = Arc::new(CrashState {
            crash_after_bytes: AtomicU64::new(NO_CRASH),
            bytes_written: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        });
        let switch = CrashSwitch {
            state: Arc::clone(&state),
        };
        (Self { inner, state }, switch)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.state.crashed.load(Ordering::SeqCst) {
            return Err(self.crash("write"));
        }
        let written = self.state.bytes_written.load(Ordering::SeqCst);
        let threshold = self.state.crash_after_bytes.load(Ordering::SeqCst);
        let len = data.len() as u64;

        if written.saturating_add(len) > threshold {
            let partial = threshold.saturating_sub(written) as usize;
            if partial > 0 {
                let _ = self.inner.append(&data[..partial]);
                let _ = self.inner.flush();
            }
            self.state
                .bytes_written
                .fetch_add(partial as u64, Ordering::SeqCst);
            return Err(self.crash("partial write"));
        }

        let offset = self.inner.append(data)?;
        self.state.bytes_written.fetch_add(len, Ordering::SeqCst);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.state.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.crash("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.state.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.crash("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        if self.state.crashed.load(Ordering::SeqCst) {
            return Err(self.crash("compaction"));
        }
        self.inner.replace(data)
    }
}
