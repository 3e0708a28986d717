//! Reconciliation of external resources against desired-state tables.
//!
//! Producers write desired objects into a [`converge_statedb::Table`] with a
//! `Pending` or `PendingDelete` status. The reconciler applies them to a
//! resource through [`Operations`] and writes the outcome back into each
//! object's [`Status`].
//!
//! # Key Concepts
//!
//! ## Incremental rounds
//!
//! On every table change the reconciler scans the rows changed since its last
//! round, marks them `InProgress`, calls `update` or `delete` and records
//! `Done`, removes deleted rows, or records `Error`.
//!
//! ## Retries
//!
//! Failed objects are retried with exponential backoff between
//! `retry_backoff_min_duration` and `retry_backoff_max_duration`. The backoff
//! resets once the object succeeds.
//!
//! ## Full reconciliation
//!
//! Every `full_reconciliation_interval` all `Done` objects are re-applied to
//! repair drift, and `prune` removes resource entries nothing in the table
//! asks for.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use converge_reconciler::{spawn, Config, Status};
//!
//! let config = Config::new(
//!     |entry: &Entry| entry.status.clone(),
//!     |entry: &Entry, status| Entry { status, ..entry.clone() },
//!     Arc::new(MapOps::new(map)),
//! );
//! let handle = spawn(db.clone(), entries.clone(), config)?;
//! // ... write objects ...
//! handle.shutdown().await?;
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod config;
pub mod error;
pub mod r#loop;
pub mod ops;
pub mod reconciler;
pub mod retry;
pub mod status;
pub mod types;

// Re-export main types
pub use config::{Config, GetObjectStatus, Timings, WithObjectStatus};
pub use error::{Error, Result};
pub use ops::{BatchEntry, BatchOperations, Objects, Operations};
pub use r#loop::{spawn, LoopStopper, ReconcilerHandle, ReconciliationLoop};
pub use reconciler::{IncrementalRound, Reconciler};
pub use retry::{Backoff, RetryQueue};
pub use status::{Op, Status, StatusKind};
pub use types::{FullResult, RoundResult};
