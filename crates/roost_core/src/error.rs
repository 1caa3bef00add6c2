//! Error types for the Roost local store.

use crate::record::SyncState;
use crate::types::RecordId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the record model and the local store.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] roost_storage::StorageError),

    /// I/O error outside a storage backend (directory handling, locking).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A row or payload could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// Journal content is structurally valid but semantically wrong.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the problem.
        message: String,
    },

    /// No record with this id exists in the table.
    #[error("record {id} not found in {entity_type}")]
    NotFound {
        /// Table that was searched.
        entity_type: String,
        /// The missing id.
        id: RecordId,
    },

    /// An upsert over a pending record carried an outdated revision.
    #[error("stale write to {id}: record is at revision {current}, write was based on {given}")]
    StaleWrite {
        /// The record id.
        id: RecordId,
        /// Revision currently stored.
        current: u64,
        /// Revision the caller supplied.
        given: u64,
    },

    /// The record is pending deletion and can no longer be edited.
    #[error("record {id} is pending deletion")]
    RecordDeleted {
        /// The record id.
        id: RecordId,
    },

    /// A lifecycle transition is not allowed from the record's current state.
    #[error("cannot {action} record {id} in state {state}")]
    InvalidTransition {
        /// The record id.
        id: RecordId,
        /// State the record was in.
        state: SyncState,
        /// The rejected action.
        action: &'static str,
    },

    /// Re-keying would overwrite another record with unsynced changes.
    #[error("cannot re-key to {id}: a record with unsynced changes already uses it")]
    IdConflict {
        /// The target id.
        id: RecordId,
    },

    /// Entity type names must be usable as file names.
    #[error("invalid entity type name {name:?}")]
    InvalidEntityType {
        /// The rejected name.
        name: String,
    },

    /// The table was opened earlier with a different payload type.
    #[error("entity type {name} is already registered with a different payload type")]
    EntityTypeMismatch {
        /// The entity type name.
        name: String,
    },

    /// A journal write failed and could not be undone; the table accepts
    /// no more writes until it is reopened.
    #[error("journal is unusable after a failed write; reopen the table")]
    JournalFailed,

    /// Another process holds the store directory.
    #[error("store is locked by another process")]
    StoreLocked,

    /// The store directory does not exist and creation was disabled.
    #[error("store not found: {path}")]
    StoreNotFound {
        /// The missing directory.
        path: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(entity_type: impl Into<String>, id: RecordId) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id,
        }
    }

    /// Creates an invalid transition error.
    pub fn invalid_transition(id: RecordId, state: SyncState, action: &'static str) -> Self {
        Self::InvalidTransition { id, state, action }
    }

    /// Returns true for errors caused by the caller's request rather than by
    /// the store itself.
    ///
    /// Storage, codec and format errors mean the local store is unusable;
    /// everything else leaves it intact.
    pub fn is_usage_error(&self) -> bool {
        !matches!(
            self,
            Self::Storage(_)
                | Self::Io(_)
                | Self::Codec { .. }
                | Self::InvalidFormat { .. }
                | Self::JournalFailed
                | Self::StoreLocked
                | Self::StoreNotFound { .. }
        )
    }
}
