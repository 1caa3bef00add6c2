//! # Roost Core
//!
//! The syncable record model and the journaled local store of the Roost
//! offline-first sync engine.
//!
//! Every domain payload is wrapped in a [`SyncableRecord`] that tracks
//! whether the server has confirmed the latest local state. Records live in
//! per-entity-type [`Table`]s inside a [`SyncStore`]; tables persist every
//! committed write to an append-only journal and recover from a torn tail
//! on open.
//!
//! ## Example
//!
//! ```rust
//! use roost_core::{Entity, RecordStore, SyncState, SyncStore};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Hen {
//!     name: String,
//! }
//!
//! impl Entity for Hen {
//!     const ENTITY_TYPE: &'static str = "hen";
//! }
//!
//! let store = SyncStore::in_memory();
//! let hens = store.table::<Hen>().unwrap();
//!
//! let goldie = hens.create(Hen { name: "Goldie".into() }).unwrap();
//! assert_eq!(goldie.sync_state(), SyncState::PendingCreate);
//! assert_eq!(hens.get_unsynced().unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod config;
mod dir;
mod entity;
mod error;
mod journal;
mod record;
mod row;
mod store;
mod sync_store;
mod table;
mod types;

pub use change_feed::{ChangeEvent, ChangeFeed, ChangeKind};
pub use config::StoreConfig;
pub use dir::StoreDir;
pub use entity::{Entity, ValidationError};
pub use error::{CoreError, CoreResult};
pub use record::{
    DeleteDisposition, FailureKind, PendingOp, RemoteRecord, ServerAck, SyncState,
    SyncableRecord,
};
pub use store::{RecordStore, UpdateAction};
pub use sync_store::SyncStore;
pub use table::Table;
pub use types::{Clock, EntityType, ManualClock, RecordId, SystemClock, Timestamp};
