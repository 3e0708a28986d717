//! Map error types.

use thiserror::Error;

/// Result type alias for map operations.
pub type Result<T> = std::result::Result<T, MapError>;

/// Errors returned by [`Map`](crate::Map) and the codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("map '{name}' is not open")]
    NotOpen { name: String },

    #[error("key does not exist")]
    KeyNotExist,

    #[error("map '{name}' is full ({max_entries} entries)")]
    Full { name: String, max_entries: usize },

    #[error("{what} size mismatch in map '{name}': expected {expected} bytes, got {actual}")]
    SizeMismatch {
        name: String,
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid map spec: {reason}")]
    InvalidSpec { reason: String },

    #[error("encode failed: {reason}")]
    Encode { reason: String },

    #[error("decode failed: {reason}")]
    Decode { reason: String },
}

impl MapError {
    /// Create an invalid spec error.
    pub fn invalid_spec(reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            reason: reason.into(),
        }
    }

    /// Whether the error reports a missing key.
    pub const fn is_key_not_exist(&self) -> bool {
        matches!(self, Self::KeyNotExist)
    }

    /// Convert into a reconciler operation failure for `op`.
    pub fn into_operation(self, op: &str) -> converge_reconciler::Error {
        converge_reconciler::Error::operation(op, self.to_string())
    }
}
