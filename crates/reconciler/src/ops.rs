//! The boundary to the resource being reconciled.

use async_trait::async_trait;
use converge_statedb::{Object, ReadTxn, Revision};

use crate::error::Result;

/// Desired objects handed to [`Operations::prune`], with their revisions.
pub type Objects<'a, O> = Box<dyn Iterator<Item = (O, Revision)> + Send + 'a>;

/// Operations that make a resource match desired objects.
///
/// The reconciler is the only caller; implementations may assume calls for
/// one resource never overlap.
#[async_trait]
pub trait Operations<O: Object>: Send + Sync {
    /// Make the resource reflect `object`.
    ///
    /// Returns whether the resource was mutated. A second call with the same
    /// object returns `false`.
    async fn update(&self, txn: &ReadTxn, object: &O) -> Result<bool>;

    /// Remove `object` from the resource. An absent entry is not an error.
    async fn delete(&self, txn: &ReadTxn, object: &O) -> Result<()>;

    /// Remove every resource entry that has no counterpart in `objects`.
    ///
    /// An empty iterator removes everything. Objects arrive in primary key
    /// order, but implementations should rely only on seeing each desired
    /// object once.
    async fn prune(&self, txn: &ReadTxn, objects: Objects<'_, O>) -> Result<()>;
}

/// One object in a batch call, with a slot for its outcome.
#[derive(Debug, Clone)]
pub struct BatchEntry<O> {
    pub object: O,
    pub revision: Revision,
    pub result: Result<()>,
}

impl<O> BatchEntry<O> {
    /// Create an entry whose result defaults to success.
    pub const fn new(object: O, revision: Revision) -> Self {
        Self {
            object,
            revision,
            result: Ok(()),
        }
    }
}

/// Batched form of [`Operations`], used by incremental rounds when configured.
///
/// Must behave like calling the per-object operation for each entry and
/// recording its outcome in `result`.
#[async_trait]
pub trait BatchOperations<O: Object>: Send + Sync {
    /// Update every entry.
    async fn update_batch(&self, txn: &ReadTxn, batch: &mut [BatchEntry<O>]);

    /// Delete every entry.
    async fn delete_batch(&self, txn: &ReadTxn, batch: &mut [BatchEntry<O>]);
}
