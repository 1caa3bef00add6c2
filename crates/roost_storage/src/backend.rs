//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte log holding one table's journal.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at
/// - `read_at` returns exactly the bytes previously appended there
/// - `truncate` only ever shortens the log (used to drop a torn tail)
/// - `replace` swaps the whole log for a new image in one step; readers never
///   observe a half-written image
/// - Backends are `Send + Sync` so a table can be shared across threads
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is outside the log.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the log and returns its offset.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the log in bytes.
    fn size(&self) -> StorageResult<u64>;

    /// Makes all appended data and file metadata durable.
    fn sync(&mut self) -> StorageResult<()>;

    /// Shortens the log to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncatePastEnd`] if `new_size` exceeds the
    /// current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the entire log with `data`.
    ///
    /// Used by journal compaction.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Reads the whole log.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }
}
