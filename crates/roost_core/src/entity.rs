//! The trait every synchronized payload type implements.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A domain payload that can live in a Roost table.
///
/// Serialization comes from serde; the trait adds the table name and the
/// pre-push validation rules.
///
/// ```rust
/// use roost_core::{Entity, ValidationError};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Note {
///     title: String,
/// }
///
/// impl Entity for Note {
///     const ENTITY_TYPE: &'static str = "note";
///
///     fn validate(&self) -> Result<(), ValidationError> {
///         ValidationError::require("title", &self.title)
///     }
/// }
///
/// assert!(Note { title: String::new() }.validate().is_err());
/// ```
pub trait Entity:
    Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static
{
    /// Table name, also used as the journal file stem.
    const ENTITY_TYPE: &'static str;

    /// Checks the payload before it is sent to the server.
    ///
    /// A failing payload is marked as a terminal sync error without a
    /// network call.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// A payload failed its pre-push checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub reason: String,
}

impl ValidationError {
    /// Creates a validation error.
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    /// Fails if a required text field is blank.
    pub fn require(field: &'static str, value: &str) -> Result<(), Self> {
        if value.trim().is_empty() {
            Err(Self::new(field, "is required"))
        } else {
            Ok(())
        }
    }

    /// Fails if an optional text field is absent or blank.
    pub fn require_some(field: &'static str, value: Option<&str>) -> Result<(), Self> {
        Self::require(field, value.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_missing() {
        assert!(ValidationError::require("name", "Rhode Island Red").is_ok());
        let err = ValidationError::require("name", "   ").unwrap_err();
        assert_eq!(err.field, "name");
        assert_eq!(err.to_string(), "invalid name: is required");
    }

    #[test]
    fn absent_optional_is_missing() {
        assert!(ValidationError::require_some("owner_id", None).is_err());
        assert!(ValidationError::require_some("owner_id", Some("u1")).is_ok());
    }
}
