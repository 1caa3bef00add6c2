//! # Roost Storage
//!
//! Byte stores that hold the local journal of every Roost table.
//!
//! A backend is an **opaque, append-only byte log**. It knows nothing about
//! records, sync metadata or framing; `roost_core` owns the journal format
//! and only asks a backend to append, read back, truncate a torn tail, and
//! atomically swap in a compacted image.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and throwaway caches
//! - [`FileBackend`] - one file per table, survives restarts
//!
//! ## Example
//!
//! ```rust
//! use roost_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//!
//! backend.replace(b"compacted").unwrap();
//! assert_eq!(backend.read_all().unwrap(), b"compacted");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
