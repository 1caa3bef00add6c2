//! # Roost Testkit
//!
//! Test utilities for Roost.
//!
//! This crate provides:
//! - [`TestStore`] fixtures over memory or a temporary directory
//! - Proptest strategies for domain payloads and records in any sync state
//! - [`InMemoryRemote`], a reference server implementing the gateway
//! - [`CrashableBackend`] for torn-write recovery tests
//! - [`init_test_logging`]
//!
//! ## Usage
//!
//! ```rust
//! use roost_domain::{Flock, FlockType};
//! use roost_testkit::prelude::*;
//!
//! let store = TestStore::memory();
//! let flocks = store.table::<Flock>().unwrap();
//! flocks.create(Flock::new("farmer-1", "Back paddock", FlockType::Layer)).unwrap();
//! assert_eq!(flocks.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::remote::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use remote::*;
