//! Error types for the state database.

use thiserror::Error;

use crate::Revision;

/// Result type alias for table and transaction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// State database error types.
///
/// Lookups of absent keys are not errors: they return `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Table construction
    #[error("table name must not be empty")]
    EmptyTableName,

    #[error("table '{table}' has no unique index to serve as primary")]
    NoUniqueIndex { table: String },

    #[error("table '{table}' declares index '{index}' more than once")]
    DuplicateIndexName { table: String, index: String },

    #[error("table '{table}' uses reserved index name '{index}'")]
    ReservedIndexName { table: String, index: String },

    // Registration
    #[error("table '{table}' is already registered")]
    TableAlreadyRegistered { table: String },

    #[error("table '{table}' is not registered")]
    TableNotRegistered { table: String },

    #[error("table '{table}' is registered with a different object type")]
    TableTypeMismatch { table: String },

    // Transactions
    #[error("table '{table}' is not locked by this write transaction")]
    TableNotLockedForWrite { table: String },

    // Queries and writes
    #[error("table '{table}' has no index named '{index}'")]
    UnknownIndex { table: String, index: String },

    #[error("index '{index}' is not the primary index of table '{table}'")]
    NotPrimaryIndex { table: String, index: String },

    #[error("primary index of table '{table}' produced {count} keys, expected exactly one")]
    InvalidPrimaryKey { table: String, count: usize },

    #[error("object not found in table '{table}'")]
    ObjectNotFound { table: String },

    #[error("revision mismatch in table '{table}': expected {expected}, found {actual}")]
    RevisionNotEqual {
        table: String,
        expected: Revision,
        actual: Revision,
    },
}

impl Error {
    /// Create a table not registered error.
    pub fn table_not_registered(table: impl Into<String>) -> Self {
        Self::TableNotRegistered {
            table: table.into(),
        }
    }

    /// Create a table type mismatch error.
    pub fn table_type_mismatch(table: impl Into<String>) -> Self {
        Self::TableTypeMismatch {
            table: table.into(),
        }
    }

    /// Create an unknown index error.
    pub fn unknown_index(table: impl Into<String>, index: impl Into<String>) -> Self {
        Self::UnknownIndex {
            table: table.into(),
            index: index.into(),
        }
    }

    /// Create an object not found error.
    pub fn object_not_found(table: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            table: table.into(),
        }
    }

    /// Whether this error means the row moved on since it was read.
    ///
    /// Compare-and-swap callers treat these as "someone else wrote first".
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::RevisionNotEqual { .. } | Self::ObjectNotFound { .. }
        )
    }
}
