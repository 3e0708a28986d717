//! Error types for the reconciler crate.

use std::fmt;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone)]
pub enum Error {
    /// The state database rejected a read or write.
    Store(converge_statedb::Error),
    /// An operation against the external resource failed.
    Operation { op: String, reason: String },
    /// Invalid configuration.
    InvalidConfig { reason: String },
    /// Loop was stopped.
    LoopStopped,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => {
                write!(f, "state database error: {e}")
            }
            Self::Operation { op, reason } => {
                write!(f, "{op} failed: {reason}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
            Self::LoopStopped => {
                write!(f, "reconciliation loop stopped")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<converge_statedb::Error> for Error {
    fn from(e: converge_statedb::Error) -> Self {
        Self::Store(e)
    }
}

impl From<converge_core::Error> for Error {
    fn from(e: converge_core::Error) -> Self {
        Self::invalid_config(e.to_string())
    }
}

impl Error {
    /// Create an operation failed error.
    pub fn operation(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Operation {
            op: op.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether this is a compare-and-swap conflict on a status write.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::operation("update", "map is full");
        assert_eq!(err.to_string(), "update failed: map is full");
    }

    #[test]
    fn test_store_error_conversion() {
        let err: Error = converge_statedb::Error::object_not_found("example").into();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("example"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_core_error_becomes_invalid_config() {
        let err: Error = converge_core::Error::toml_parse_failed("bad").into();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }
}
