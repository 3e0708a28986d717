//! Per-object reconciliation status.
//!
//! Objects carry a [`Status`] that producers set to `Pending` or
//! `PendingDelete` and the reconciler moves through `InProgress` to `Done` or
//! `Error`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an object is in its reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusKind {
    /// Waiting to be written to the resource.
    Pending,
    /// Waiting to be removed from the resource.
    PendingDelete,
    /// Handed to the operations of the current round.
    InProgress,
    /// Resource matches the object.
    Done,
    /// Last attempt failed; retried after backoff.
    Error,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::PendingDelete => "pending-delete",
            Self::InProgress => "in-progress",
            Self::Done => "done",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// The operation a status tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Op {
    Update,
    Delete,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Reconciliation status of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub kind: StatusKind,
    pub op: Op,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Status {
    fn new(kind: StatusKind, op: Op, error: Option<String>) -> Self {
        Self {
            kind,
            op,
            updated_at: Utc::now(),
            error,
        }
    }

    /// The object should be written to the resource.
    pub fn pending() -> Self {
        Self::new(StatusKind::Pending, Op::Update, None)
    }

    /// The object should be removed from the resource, then from the table.
    pub fn pending_delete() -> Self {
        Self::new(StatusKind::PendingDelete, Op::Delete, None)
    }

    /// The object is being processed.
    pub fn in_progress(op: Op) -> Self {
        Self::new(StatusKind::InProgress, op, None)
    }

    /// The resource matches the object.
    pub fn done() -> Self {
        Self::new(StatusKind::Done, Op::Update, None)
    }

    /// The last `op` failed with `error`.
    pub fn error(op: Op, error: impl Into<String>) -> Self {
        Self::new(StatusKind::Error, op, Some(error.into()))
    }

    /// The operation an incremental round should run for the object, if any.
    ///
    /// `InProgress` rows were interrupted and `Error` rows are retried, so
    /// both repeat their recorded op.
    pub const fn pending_op(&self) -> Option<Op> {
        match self.kind {
            StatusKind::Pending => Some(Op::Update),
            StatusKind::PendingDelete => Some(Op::Delete),
            StatusKind::InProgress | StatusKind::Error => Some(self.op),
            StatusKind::Done => None,
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::pending()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.error) {
            (StatusKind::Error, Some(error)) => {
                write!(f, "error ({}): {error}", self.op)
            }
            (StatusKind::InProgress, _) => write!(f, "in-progress ({})", self.op),
            (kind, _) => write!(f, "{kind}"),
        }
    }
}
