use thiserror::Error;

use super::value::ValueType;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DataError {
    #[error("NULL received for non-nullable property {property}")]
    NullForNonNullable { property: String },

    #[error("NULL received for a non-nullable value")]
    UnexpectedNull,

    #[error("Type mismatch: expected {expected:?}, found {found}")]
    TypeMismatch { expected: ValueType, found: String },

    #[error("Row {entity}#{id} no longer exists")]
    MissingRow { entity: String, id: String },

    #[error("Navigation to {entity} is not loaded and has no deferred loader")]
    NotLoaded { entity: String },

    #[error("Row for {entity} has a NULL identifier")]
    NullIdentifier { entity: String },

    #[error("Entity of type {found} cannot be stored where {expected} is expected")]
    EntityTypeMismatch { expected: String, found: String },
}
