//! Store directory layout and locking.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                 # Advisory lock for single-process access
//! ├─ flock.journal        # One journal per entity type
//! └─ post.journal
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::EntityType;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_EXTENSION: &str = "journal";

/// An opened store directory holding the exclusive lock.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - [`CoreError::StoreNotFound`] if the directory is missing and
    ///   `create_if_missing` is false
    /// - [`CoreError::StoreLocked`] if another handle holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::StoreNotFound {
                    path: path.display().to_string(),
                });
            }
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| CoreError::StoreLocked)?;

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Root path of the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Journal file for an entity type.
    pub fn journal_path(&self, entity_type: &EntityType) -> PathBuf {
        self.path
            .join(entity_type.as_str())
            .with_extension(JOURNAL_EXTENSION)
    }

    /// Entity types that have a journal on disk.
    pub fn existing_tables(&self) -> CoreResult<Vec<EntityType>> {
        let mut tables = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(JOURNAL_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                let entity_type = EntityType::new(stem);
                if entity_type.is_valid() {
                    tables.push(entity_type);
                }
            }
        }
        tables.sort();
        Ok(tables)
    }
}
