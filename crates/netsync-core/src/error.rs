//! Error types for record, diff and reconcile operations.
//!
//! All errors implement `std::error::Error` via `thiserror`. Every variant
//! carries owned strings so errors can be cloned into run reports.

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while building stores or applying changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Two records of one type collapsed to the same identifier.
    #[error("Duplicate {kind} record '{key}'")]
    DuplicateRecord {
        /// The record type.
        kind: String,
        /// The rendered identifier.
        key: String,
    },

    /// A record could not be built because an identifier field was absent.
    #[error("Missing identifier field '{field}' for {kind} record")]
    MissingIdentifier {
        /// The record type.
        kind: String,
        /// The missing identifier field.
        field: String,
    },

    /// A referenced object could not be resolved in the datastore.
    #[error("Related {kind} not found for {filter}")]
    RelatedObjectNotFound {
        /// The object kind that was looked up.
        kind: String,
        /// The rendered lookup filter.
        filter: String,
    },

    /// A natural-key lookup matched more than one object.
    #[error("Multiple {kind} objects returned for {filter}")]
    MultipleObjectsReturned {
        /// The object kind that was looked up.
        kind: String,
        /// The rendered lookup filter.
        filter: String,
    },

    /// A collaborator returned data of the wrong shape.
    #[error("Unexpected result shape from {context}: expected {expected}, found {found}")]
    UnexpectedResultShape {
        /// Where the data came from.
        context: String,
        /// The expected shape.
        expected: String,
        /// What was actually received.
        found: String,
    },

    /// A datastore call failed (uniqueness violation, missing object, ...).
    #[error("Datastore operation failed: {operation}: {message}")]
    Datastore {
        /// The operation that failed (e.g., "create", "update").
        operation: String,
        /// Error message.
        message: String,
    },

    /// No handler is registered for a record type.
    #[error("Unknown record type '{kind}'")]
    UnknownRecordType {
        /// The record type.
        kind: String,
    },

    /// The configured type order is not a valid topological order.
    #[error("Invalid type order: {message}")]
    InvalidTypeOrder {
        /// Error message.
        message: String,
    },

    /// Run configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// A record-level failure stopped the run (continue-on-failure unset).
    #[error("Reconciliation aborted at {kind} '{key}': {message}")]
    Aborted {
        /// The record type being applied.
        kind: String,
        /// The rendered identifier.
        key: String,
        /// The underlying failure.
        message: String,
    },
}

impl SyncError {
    /// Creates a datastore error.
    pub fn datastore(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Datastore {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a related-object-not-found error.
    pub fn related_not_found(kind: impl Into<String>, filter: impl ToString) -> Self {
        Self::RelatedObjectNotFound {
            kind: kind.into(),
            filter: filter.to_string(),
        }
    }

    /// Creates an unexpected-result-shape error.
    pub fn unexpected_shape(
        context: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::UnexpectedResultShape {
            context: context.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid type order error.
    pub fn invalid_order(message: impl Into<String>) -> Self {
        Self::InvalidTypeOrder {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a contract violation that must
    /// abort the run regardless of continue-on-failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::UnexpectedResultShape { .. }
                | SyncError::UnknownRecordType { .. }
                | SyncError::InvalidTypeOrder { .. }
        )
    }

    /// Returns true if this error is a per-record data problem that
    /// continue-on-failure may skip over.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            SyncError::RelatedObjectNotFound { .. }
                | SyncError::MultipleObjectsReturned { .. }
                | SyncError::Datastore { .. }
                | SyncError::DuplicateRecord { .. }
                | SyncError::MissingIdentifier { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::related_not_found("manufacturer", "name=Arista");
        assert_eq!(err.to_string(), "Related manufacturer not found for name=Arista");
    }

    #[test]
    fn test_datastore_error() {
        let err = SyncError::datastore("create", "duplicate interface name");
        assert_eq!(
            err.to_string(),
            "Datastore operation failed: create: duplicate interface name"
        );
    }

    #[test]
    fn test_is_fatal() {
        assert!(SyncError::unexpected_shape("datastore", "object", "list").is_fatal());
        assert!(!SyncError::related_not_found("vlan", "vid=10").is_fatal());
        assert!(!SyncError::datastore("update", "conflict").is_fatal());
    }

    #[test]
    fn test_is_record_level() {
        assert!(SyncError::related_not_found("vlan", "vid=10").is_record_level());
        assert!(!SyncError::invalid_order("cycle").is_record_level());
    }
}
