//! Core error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::RowId;

/// One failing property in a validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Property name (or request field such as `pageSize`).
    pub property: String,
    /// Human readable reason.
    pub reason: String,
}

impl FieldError {
    pub fn new(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.property, self.reason)
    }
}

/// Every field that failed validation, collected in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    pub fn add(&mut self, property: impl Into<String>, reason: impl Into<String>) {
        self.push(FieldError::new(property, reason));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    /// Whether any failure names the given property.
    pub fn contains(&self, property: &str) -> bool {
        self.errors.iter().any(|e| e.property == property)
    }

    /// `Ok(())` when nothing failed, otherwise `Error::Validation`.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl From<FieldError> for ValidationErrors {
    fn from(error: FieldError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// The kind of resource a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Catalog,
    Entity,
    Property,
    Row,
    Relationship,
    Template,
    View,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Catalog => "catalog",
            ResourceKind::Entity => "entity",
            ResourceKind::Property => "property",
            ResourceKind::Row => "row",
            ResourceKind::Relationship => "relationship",
            ResourceKind::Template => "template",
            ResourceKind::View => "view",
        };
        f.write_str(name)
    }
}

/// Conflicts with existing state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    /// Another row of the same entity and tenant holds this value.
    #[error("unique property {entity}.{property} already holds '{value}'")]
    UniqueViolation {
        entity: String,
        property: String,
        value: String,
    },

    /// A link would exceed the declared cardinality.
    #[error("relationship {relationship} cardinality violated: {detail}")]
    Cardinality {
        relationship: String,
        detail: String,
    },

    /// A link would make a row its own transitive parent.
    #[error("linking {parent} as parent of {child} would create a cycle")]
    Cycle { parent: RowId, child: RowId },

    /// Children depend on the row through a relationship that forbids orphaning.
    #[error("row {row} has {count} dependent child rows through {relationship}")]
    DeleteRestricted {
        row: RowId,
        relationship: String,
        count: usize,
    },

    /// Cascading delete went deeper than the configured bound.
    #[error("cascade delete exceeded maximum depth of {depth}")]
    CascadeDepth { depth: usize },

    /// A populated property cannot change type.
    #[error("property {entity}.{property} has stored values; its type cannot change")]
    ImmutablePropertyType { entity: String, property: String },

    /// A property cannot be renamed once rows exist.
    #[error("entity {entity} has rows; property {property} cannot be renamed")]
    ImmutablePropertyName { entity: String, property: String },

    /// Uniqueness cannot be switched on for a property that already holds values.
    #[error("property {entity}.{property} has stored values; it cannot become unique")]
    UniqueOnPopulated { entity: String, property: String },

    /// Built-in properties cannot be changed or removed.
    #[error("property {property} is built in and cannot be modified")]
    DefaultProperty { property: String },

    /// The entity is still referenced.
    #[error("entity {entity} is still in use: {reason}")]
    EntityInUse { entity: String, reason: String },

    /// Rows are still linked through the relationship.
    #[error("relationship {relationship} still links rows")]
    RelationshipInUse { relationship: String },

    /// A definition with this name already exists.
    #[error("{kind} '{name}' already exists")]
    Duplicate { kind: String, name: String },
}

/// Engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Input does not match the schema. Carries every failing field.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// Actor lacks the right to perform the action.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Entity, row or definition absent (or not visible to the actor).
    #[error("{kind} not found: {key}")]
    NotFound { kind: ResourceKind, key: String },

    /// Uniqueness, cardinality or dependency conflict.
    #[error("conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Internal invariant broken.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// Transient storage failures persisted past the retry budget.
    #[error("storage unavailable after {attempts} attempts: {message}")]
    StorageUnavailable { attempts: u32, message: String },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    pub fn not_found(kind: ResourceKind, key: impl fmt::Display) -> Self {
        Error::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// Single-field validation failure.
    pub fn invalid(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation(FieldError::new(property, reason).into())
    }

    /// Failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage(sled::Error::Io(_)))
    }

    /// Field failures carried by a validation error.
    pub fn field_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Error::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<sled::transaction::TransactionError<Error>> for Error {
    fn from(err: sled::transaction::TransactionError<Error>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => Error::Storage(e),
        }
    }
}

/// Result alias for engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_collect_every_field() {
        let mut errors = ValidationErrors::new();
        errors.add("amount", "is required");
        errors.add("status", "'paid' is not an option");

        let err = errors.into_result().unwrap_err();
        let fields = err.field_errors().unwrap();
        assert_eq!(fields.len(), 2);
        assert!(fields.contains("amount"));
        assert_eq!(
            err.to_string(),
            "validation failed: amount: is required; status: 'paid' is not an option"
        );
    }

    #[test]
    fn test_empty_validation_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_io_errors_are_transient() {
        let io = sled::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "gone"));
        assert!(Error::Storage(io).is_transient());
        assert!(!Error::Consistency("x".into()).is_transient());
    }
}
