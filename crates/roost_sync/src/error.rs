//! Error types for the sync engine.

use roost_core::{CoreError, EntityType};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for remote gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors reported by a [`crate::RemoteGateway`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// No connectivity.
    #[error("offline")]
    Offline,

    /// The server answered with an error status.
    #[error("server returned {status}: {message}")]
    Server {
        /// HTTP-style status code.
        status: u16,
        /// Server message.
        message: String,
    },

    /// The server rejected the payload.
    #[error("rejected by server: {message}")]
    Rejected {
        /// Why the payload was rejected.
        message: String,
    },

    /// The server has no record with this id.
    #[error("record {id} not found on server")]
    NotFound {
        /// The id that was pushed.
        id: String,
    },
}

impl GatewayError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Classifies a bare error message from a client library.
    ///
    /// Messages mentioning a timeout, the network, a connection or an
    /// unavailable service are transient; anything else is not.
    pub fn from_message(message: impl Into<String>) -> Self {
        const TRANSIENT: [&str; 4] = ["timeout", "network", "connection", "unavailable"];
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        let retryable = TRANSIENT.iter().any(|keyword| lower.contains(keyword));
        Self::Transport { message, retryable }
    }

    /// Returns true if this error can be retried.
    ///
    /// 5xx, 408 and 429 statuses are transient; other statuses mean the
    /// request itself is wrong.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Timeout | Self::Offline => true,
            Self::Server { status, .. } => *status >= 500 || matches!(status, 408 | 429),
            Self::Rejected { .. } | Self::NotFound { .. } => false,
        }
    }
}

/// Errors that abort a sync pass or an engine call.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The local store failed.
    #[error("local store error: {0}")]
    Store(#[from] CoreError),

    /// A gateway call failed.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// The pass was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A pass for this entity type is already running.
    #[error("a sync pass for {entity_type} is already running")]
    PassInProgress {
        /// The busy entity type.
        entity_type: EntityType,
    },

    /// No pass is registered for the entity type.
    #[error("no sync pass registered for {entity_type}")]
    UnknownEntityType {
        /// The requested entity type.
        entity_type: EntityType,
    },

    /// A pass for the entity type is already registered.
    #[error("a sync pass for {entity_type} is already registered")]
    DuplicateEntityType {
        /// The duplicated entity type.
        entity_type: EntityType,
    },

    /// The periodic driver's worker task failed.
    #[error("sync driver failed: {0}")]
    Driver(String),
}

impl SyncError {
    /// Returns true if trying again later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway(e) => e.is_retryable(),
            Self::PassInProgress { .. } => true,
            _ => false,
        }
    }
}
