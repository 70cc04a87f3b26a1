//! Error types for semstore.
//!
//! All errors are strongly typed using thiserror. Backend failures live in
//! [`crate::storage::StorageError`]; this module layers validation, schema and
//! execution failures on top and folds them into [`StoreError`].

use thiserror::Error;

use crate::entity::EntityId;
use crate::storage::StorageError;

/// Validation errors that occur while checking caller-supplied input.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Malformed entity key '{key}': {reason}")]
    MalformedEntityKey {
        key: String,
        reason: String,
    },

    #[error("Malformed property key '{key}': {reason}")]
    MalformedPropertyKey {
        key: String,
        reason: String,
    },

    #[error("Invalid property statistics argument: {reason}")]
    PropertyStatisticsInvalidArgument {
        reason: String,
    },

    #[error("Subobject '{subobject}' does not belong to subject '{subject}'")]
    ForeignSubobject {
        subject: String,
        subobject: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Schema defects: a table layout or a produced row does not match what the
/// registry declares. These are programming errors and are never retried.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Table '{table}' row is missing required id field '{field}'")]
    TableMissingIdField {
        table: String,
        field: &'static str,
    },

    #[error("Unknown property table '{table}'")]
    UnknownTable {
        table: String,
    },

    #[error("Property '{property}' is stored as {expected} but received a {actual} value")]
    KindMismatch {
        property: String,
        expected: String,
        actual: String,
    },
}

/// Errors raised by the concept cache.
#[derive(Debug, Error)]
pub enum ConceptError {
    #[error("Concept not found: {key}")]
    NotFound {
        key: String,
    },

    #[error("Concept {id} has no stored definition")]
    MissingDefinition {
        id: EntityId,
    },

    #[error("Concept {id} has an unreadable definition: {message}")]
    InvalidDefinition {
        id: EntityId,
        message: String,
    },
}

/// Top-level error type for semstore.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Concept error: {0}")]
    Concept(#[from] ConceptError),

    #[error("Job error: {message}")]
    Job {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl StoreError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a schema defect.
    #[must_use]
    pub const fn is_schema(&self) -> bool {
        matches!(self, Self::Schema(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if the whole operation may succeed when retried.
    ///
    /// Only connection failures qualify; duplicate-key races are recovered
    /// internally and never reach the caller.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(StorageError::ConnectionError(_)))
    }
}

/// Result type alias for semstore operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_id_field_message() {
        let err = SchemaError::TableMissingIdField {
            table: "smw_di_blob".to_string(),
            field: "s_id",
        };
        let msg = format!("{err}");
        assert!(msg.contains("smw_di_blob"));
        assert!(msg.contains("s_id"));
    }

    #[test]
    fn test_statistics_argument_message() {
        let err = ValidationError::PropertyStatisticsInvalidArgument {
            reason: "usage count must not be negative".to_string(),
        };
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn test_store_error_from_schema() {
        let err: StoreError = SchemaError::UnknownTable {
            table: "smw_fpt_missing".to_string(),
        }
        .into();
        assert!(err.is_schema());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_store_error_retryable() {
        let err: StoreError = StorageError::ConnectionError("reset by peer".to_string()).into();
        assert!(err.is_storage());
        assert!(err.is_retryable());

        let err: StoreError = StorageError::DuplicateKey("smw_object_ids".to_string()).into();
        assert!(!err.is_retryable());

        let err = StoreError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unexpected state"));
    }

    #[test]
    fn test_concept_error_message() {
        let err = ConceptError::MissingDefinition { id: EntityId::new(42) };
        assert!(err.to_string().contains("42"));
    }
}
