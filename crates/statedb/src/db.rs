//! The database root: global revision and the set of registered tables.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::table::{Object, Table, TableMeta};
use crate::txn::{PendingTable, ReadTxn, TableStates, Txn, WriteTxn};
use crate::Revision;

#[derive(Default)]
struct Root {
    revision: Revision,
    tables: TableStates,
    locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

#[derive(Default)]
struct DbInner {
    root: parking_lot::RwLock<Root>,
}

/// Coordinator for a set of tables sharing one revision counter.
///
/// Clones share the same database.
#[derive(Clone, Default)]
pub struct Database {
    inner: Arc<DbInner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let root = self.inner.root.read();
        f.debug_struct("Database")
            .field("revision", &root.revision)
            .field("tables", &root.locks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Database {
    /// Create an empty database at revision 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a table readable and writable through this database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableAlreadyRegistered`] if a table with the same name
    /// is already registered.
    pub fn register_table<O: Object>(&self, table: &Table<O>) -> Result<()> {
        let name = table.name().to_string();
        let mut root = self.inner.root.write();
        if root.locks.contains_key(&name) {
            return Err(Error::TableAlreadyRegistered { table: name });
        }

        let state: Arc<dyn Any + Send + Sync> = table.registered_state();
        root.tables.insert(name.clone(), state);
        root.locks.insert(name.clone(), TableMeta::write_lock(table));

        info!(table = %name, primary = table.primary_index(), "Registered table");
        Ok(())
    }

    /// Current database revision.
    pub fn revision(&self) -> Revision {
        self.inner.root.read().revision
    }

    /// Snapshot of every registered table at the current revision.
    pub fn read_txn(&self) -> ReadTxn {
        let root = self.inner.root.read();
        ReadTxn::new(root.revision, root.tables.clone())
    }

    /// Lock `tables` for writing.
    ///
    /// Waits while another write transaction holds any of them. Locks are
    /// taken in name order, so concurrent writers never deadlock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableNotRegistered`] if a table was not registered with
    /// this database.
    pub async fn write_txn(&self, tables: &[&dyn TableMeta]) -> Result<WriteTxn> {
        let mut wanted = BTreeMap::new();
        {
            let root = self.inner.root.read();
            for table in tables {
                let name = table.name();
                let lock = root
                    .locks
                    .get(name)
                    .filter(|lock| Arc::ptr_eq(lock, &table.write_lock()))
                    .ok_or_else(|| Error::table_not_registered(name))?;
                wanted.insert(name.to_string(), Arc::clone(lock));
            }
        }

        let mut guards = Vec::with_capacity(wanted.len());
        for lock in wanted.values() {
            guards.push(Arc::clone(lock).lock_owned().await);
        }

        let snapshot = self.read_txn();
        debug!(
            revision = snapshot.revision(),
            tables = ?wanted.keys().collect::<Vec<_>>(),
            "Opened write transaction"
        );
        Ok(WriteTxn::new(
            self.clone(),
            snapshot,
            wanted.into_keys().collect(),
            guards,
        ))
    }

    /// Install committed table states under the next revision.
    pub(crate) fn apply(&self, changed: Vec<Box<dyn PendingTable>>) -> ReadTxn {
        let mut root = self.inner.root.write();
        if !changed.is_empty() {
            root.revision = root.revision.saturating_add(1);
            let revision = root.revision;
            let count = changed.len();
            for pending in changed {
                let (name, state) = pending.commit(revision);
                root.tables.insert(name, state);
            }
            debug!(revision, tables = count, "Committed write transaction");
        }
        ReadTxn::new(root.revision, root.tables.clone())
    }
}
