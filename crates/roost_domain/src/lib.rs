//! # Roost Domain
//!
//! Payload types for the feature areas Roost keeps in sync. Each one is an
//! [`Entity`](roost_core::Entity) with its own table and pre-push rules.
//!
//! | Area        | Types                            |
//! |-------------|----------------------------------|
//! | Farm        | [`Flock`]                        |
//! | Marketplace | [`ProductListing`], [`Order`]    |
//! | Community   | [`Post`], [`Comment`], [`UserProfile`] |

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod community;
mod farm;
mod marketplace;

pub use community::{Comment, Post, UserProfile};
pub use farm::{Flock, FlockType};
pub use marketplace::{ListingCategory, ListingStatus, Order, OrderStatus, ProductListing};

/// Table names of every domain entity.
pub const ENTITY_TYPES: [&str; 6] = [
    <Flock as roost_core::Entity>::ENTITY_TYPE,
    <ProductListing as roost_core::Entity>::ENTITY_TYPE,
    <Order as roost_core::Entity>::ENTITY_TYPE,
    <Post as roost_core::Entity>::ENTITY_TYPE,
    <Comment as roost_core::Entity>::ENTITY_TYPE,
    <UserProfile as roost_core::Entity>::ENTITY_TYPE,
];

#[cfg(test)]
mod tests {
    use super::*;
    use roost_core::EntityType;
    use std::collections::HashSet;

    #[test]
    fn entity_types_are_valid_and_distinct() {
        let names: HashSet<_> = ENTITY_TYPES.iter().collect();
        assert_eq!(names.len(), ENTITY_TYPES.len());
        for name in ENTITY_TYPES {
            assert!(EntityType::new(name).is_valid(), "{name}");
        }
    }
}
