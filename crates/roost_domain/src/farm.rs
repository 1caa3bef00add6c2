//! Farm records.

use roost_core::{Entity, ValidationError};
use serde::{Deserialize, Serialize};

/// Purpose a flock is kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlockType {
    /// Egg production.
    #[default]
    Layer,
    /// Meat production.
    Broiler,
    /// Breeding stock.
    Breeder,
    /// Game birds.
    Fighter,
}

/// A group of birds registered by a farmer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flock {
    /// Owning user.
    pub owner_id: String,
    /// Display name.
    pub name: String,
    /// Flock purpose.
    #[serde(default)]
    pub flock_type: FlockType,
    /// Breed, if known.
    #[serde(default)]
    pub breed: Option<String>,
    /// Number of birds.
    #[serde(default)]
    pub bird_count: u32,
    /// Id of the parent flock for lineage tracking.
    #[serde(default)]
    pub parent_flock_id: Option<String>,
}

impl Flock {
    /// Creates a flock with only the required fields set.
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>, flock_type: FlockType) -> Self {
        Self {
            owner_id: owner_id.into(),
            name: name.into(),
            flock_type,
            breed: None,
            bird_count: 0,
            parent_flock_id: None,
        }
    }
}

impl Entity for Flock {
    const ENTITY_TYPE: &'static str = "flock";

    fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::require("owner_id", &self.owner_id)?;
        ValidationError::require("name", &self.name)?;
        if self.parent_flock_id.is_some() {
            ValidationError::require_some("parent_flock_id", self.parent_flock_id.as_deref())?;
        }
        Ok(())
    }
}
