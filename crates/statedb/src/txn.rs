//! Read and write transactions.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::table::{Object, Pending, Table, TableState};
use crate::Revision;

mod sealed {
    pub trait Sealed {}
}

/// Anything tables can be read through: a [`ReadTxn`] or a [`WriteTxn`].
pub trait Txn: sealed::Sealed {
    /// Database revision the transaction reads at.
    fn revision(&self) -> Revision;

    #[doc(hidden)]
    fn table_state<O: Object>(&self, table: &Table<O>) -> Result<Arc<TableState<O>>>;
}

/// Erased table states keyed by table name.
pub(crate) type TableStates = im::HashMap<String, Arc<dyn Any + Send + Sync>>;

/// An immutable snapshot of every registered table.
///
/// Cloning is cheap. The snapshot never changes, whatever commits later.
#[derive(Clone)]
pub struct ReadTxn {
    revision: Revision,
    tables: TableStates,
}

impl std::fmt::Debug for ReadTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTxn")
            .field("revision", &self.revision)
            .field("tables", &self.tables.len())
            .finish()
    }
}

impl ReadTxn {
    pub(crate) const fn new(revision: Revision, tables: TableStates) -> Self {
        Self { revision, tables }
    }
}

impl sealed::Sealed for ReadTxn {}

impl Txn for ReadTxn {
    fn revision(&self) -> Revision {
        self.revision
    }

    fn table_state<O: Object>(&self, table: &Table<O>) -> Result<Arc<TableState<O>>> {
        let name = table.name();
        let erased = self
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::table_not_registered(name))?;
        erased
            .downcast::<TableState<O>>()
            .map_err(|_| Error::table_type_mismatch(name))
    }
}

/// Staged changes of one table, with the object type erased.
pub(crate) trait PendingTable: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn has_changes(&self) -> bool;

    /// Stamp changed rows with `revision`, publish the state to the table's
    /// watchers and return it for the database root.
    fn commit(self: Box<Self>, revision: Revision) -> (String, Arc<dyn Any + Send + Sync>);
}

/// Exclusive write access to a set of tables.
///
/// Changes are invisible to other transactions until [`commit`](Self::commit).
/// Dropping the transaction without committing discards them.
pub struct WriteTxn {
    db: Database,
    snapshot: ReadTxn,
    guards: Vec<OwnedMutexGuard<()>>,
    locked: Vec<String>,
    pending: BTreeMap<String, Box<dyn PendingTable>>,
}

impl std::fmt::Debug for WriteTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTxn")
            .field("revision", &self.snapshot.revision)
            .field("locked", &self.locked)
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl WriteTxn {
    pub(crate) fn new(
        db: Database,
        snapshot: ReadTxn,
        locked: Vec<String>,
        guards: Vec<OwnedMutexGuard<()>>,
    ) -> Self {
        Self {
            db,
            snapshot,
            guards,
            locked,
            pending: BTreeMap::new(),
        }
    }

    /// Names of the tables this transaction holds.
    pub fn locked_tables(&self) -> impl Iterator<Item = &str> {
        self.locked.iter().map(String::as_str)
    }

    /// Apply every staged change atomically and release the table locks.
    ///
    /// Returns a snapshot of the database right after the commit. A
    /// transaction without effective changes does not advance the revision.
    pub fn commit(self) -> ReadTxn {
        let Self {
            db,
            guards,
            pending,
            ..
        } = self;

        let changed: Vec<Box<dyn PendingTable>> = pending
            .into_values()
            .filter(|p| p.has_changes())
            .collect();
        let snapshot = db.apply(changed);

        drop(guards);
        snapshot
    }

    /// Discard every staged change and release the table locks.
    pub fn abort(self) {
        debug!(
            revision = self.snapshot.revision,
            tables = ?self.locked,
            "Aborted write transaction"
        );
    }

    pub(crate) fn pending_mut<O: Object>(&mut self, table: &Table<O>) -> Result<&mut Pending<O>> {
        let name = table.name();
        if !self.locked.iter().any(|locked| locked == name) {
            return Err(Error::TableNotLockedForWrite {
                table: name.to_string(),
            });
        }

        if !self.pending.contains_key(name) {
            let base = self.snapshot.table_state(table)?;
            let provisional = self.snapshot.revision.saturating_add(1);
            self.pending.insert(
                name.to_string(),
                Box::new(Pending::new(table.clone(), base, provisional)),
            );
        }

        self.pending
            .get_mut(name)
            .and_then(|p| p.as_any_mut().downcast_mut::<Pending<O>>())
            .ok_or_else(|| Error::table_type_mismatch(name))
    }
}

impl sealed::Sealed for WriteTxn {}

impl Txn for WriteTxn {
    fn revision(&self) -> Revision {
        self.snapshot.revision
    }

    fn table_state<O: Object>(&self, table: &Table<O>) -> Result<Arc<TableState<O>>> {
        match self.pending.get(table.name()) {
            Some(pending) => pending
                .as_any()
                .downcast_ref::<Pending<O>>()
                .map(Pending::snapshot)
                .ok_or_else(|| Error::table_type_mismatch(table.name())),
            None => self.snapshot.table_state(table),
        }
    }
}
