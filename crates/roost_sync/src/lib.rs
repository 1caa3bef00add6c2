//! # Roost Sync
//!
//! Reconciles Roost's local tables with a remote store.
//!
//! This crate provides:
//! - The [`RemoteGateway`] push/pull boundary and a scripted [`MockGateway`]
//! - The conflict [`resolve`]r (whole-record last-writer-wins, local pending
//!   changes win)
//! - The [`RetryPolicy`] with attempt caps and exponential backoff
//! - The per-entity-type [`SyncCoordinator`] and the [`SyncEngine`] registry
//! - [`PeriodicSync`], a tokio driver for the engine
//!
//! ## Architecture
//!
//! A sync pass is **push-then-pull**:
//! 1. Every pending record is pushed and its outcome written back
//! 2. Remote changes newer than the table's watermark are pulled
//! 3. Each remote record is reconciled against the local copy
//!
//! ## Key Invariants
//!
//! - A record with a pending local change is never overwritten by a pull
//! - Outcomes are written against the current record, never a stale snapshot
//! - At most one pass per entity type runs at a time
//!
//! ## Example
//!
//! ```rust
//! use roost_core::{Entity, RecordId, RecordStore, ServerAck, SyncState, SyncStore, Timestamp};
//! use roost_sync::{MockGateway, SyncConfig, SyncCoordinator};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
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
//! hens.create(Hen { name: "Goldie".into() }).unwrap();
//!
//! let gateway = Arc::new(MockGateway::new());
//! gateway.push_response(Ok(ServerAck::new("srv-1", Timestamp::from_millis(10))));
//!
//! let coordinator: SyncCoordinator<Hen, _, _> =
//!     SyncCoordinator::new(hens.clone(), gateway, &SyncConfig::default());
//! assert!(coordinator.run_pass().is_success());
//!
//! let synced = hens.get(&RecordId::from("srv-1")).unwrap().unwrap();
//! assert_eq!(synced.sync_state(), SyncState::Ok);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod engine;
mod error;
mod gateway;
mod policy;
mod resolver;
mod scheduler;

pub use config::{RetryConfig, SyncConfig};
pub use coordinator::{
    PassError, PassReport, PassResult, SyncCoordinator, SyncPhase, SyncStats,
};
pub use engine::{SyncEngine, SyncPass};
pub use error::{GatewayError, GatewayResult, SyncError, SyncResult};
pub use gateway::{MockGateway, RemoteGateway};
pub use policy::{AttemptDecision, RetryPolicy};
pub use resolver::{resolve, ResolvedAction};
pub use scheduler::PeriodicSync;
