//! Tables: indexed, versioned collections of one object type.
//!
//! A table's contents live in a [`TableState`] built from persistent
//! `im::OrdMap`s, so a snapshot is a cheap clone that never changes under a
//! reader. Writes go through a [`WriteTxn`] that stages a private copy of the
//! state and publishes it on commit.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

use im::OrdMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::index::{self, Indexer, Key, Query, REVISION_INDEX};
use crate::iter::{Filter, Iter};
use crate::txn::{PendingTable, Txn, WriteTxn};
use crate::watch::{Touched, Watch, WatchRegistry, WatchTarget};
use crate::Revision;

/// Types that can be stored in a table.
pub trait Object: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Object for T {}

/// Table metadata needed to lock a table for writing.
pub trait TableMeta: Send + Sync {
    /// Table name, unique within a database.
    fn name(&self) -> &str;

    #[doc(hidden)]
    fn write_lock(&self) -> Arc<tokio::sync::Mutex<()>>;
}

/// A stored object and the revision of the commit that last changed it.
#[derive(Debug)]
pub(crate) struct Row<O> {
    pub(crate) object: O,
    pub(crate) revision: Revision,
}

/// Immutable contents of a table at one revision.
///
/// Unique secondary entries are keyed `(key, empty)`; non-unique entries are
/// keyed `(key, primary key)`. The revision index is keyed
/// `(revision, primary key)`. Every index entry maps to the primary key.
#[doc(hidden)]
pub struct TableState<O> {
    pub(crate) revision: Revision,
    pub(crate) primary: OrdMap<Key, Arc<Row<O>>>,
    pub(crate) secondary: Vec<OrdMap<(Key, Key), Key>>,
    pub(crate) by_revision: OrdMap<(Key, Key), Key>,
}

impl<O> Clone for TableState<O> {
    fn clone(&self) -> Self {
        Self {
            revision: self.revision,
            primary: self.primary.clone(),
            secondary: self.secondary.clone(),
            by_revision: self.by_revision.clone(),
        }
    }
}

impl<O> TableState<O> {
    fn empty(secondary: usize) -> Self {
        Self {
            revision: 0,
            primary: OrdMap::new(),
            secondary: vec![OrdMap::new(); secondary],
            by_revision: OrdMap::new(),
        }
    }
}

/// Where a query name resolves to inside a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexRef {
    Primary,
    Secondary { position: usize, unique: bool },
    Revision,
}

struct Committed<O> {
    state: Arc<TableState<O>>,
    watches: WatchRegistry,
}

struct TableInner<O> {
    name: String,
    primary: Indexer<O>,
    secondary: Vec<Indexer<O>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    committed: parking_lot::Mutex<Committed<O>>,
}

/// A handle to a table. Clones share the same table.
pub struct Table<O> {
    inner: Arc<TableInner<O>>,
}

impl<O> Clone for Table<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O> std::fmt::Debug for Table<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.inner.name)
            .field("primary", &self.inner.primary.name)
            .field("secondary", &self.inner.secondary)
            .finish_non_exhaustive()
    }
}

impl<O: Object> TableMeta for Table<O> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn write_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.inner.write_lock)
    }
}

impl<O: Object> Table<O> {
    /// Create a table. The first unique index becomes the primary index.
    ///
    /// A table belongs to the one [`Database`](crate::Database) it is
    /// registered with.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, no index is unique, two indexes
    /// share a name, or an index uses the reserved revision index name.
    pub fn new(name: impl Into<String>, indexes: Vec<Indexer<O>>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::EmptyTableName);
        }

        let mut seen = BTreeSet::new();
        for indexer in &indexes {
            if indexer.name == REVISION_INDEX {
                return Err(Error::ReservedIndexName {
                    table: name,
                    index: indexer.name.to_string(),
                });
            }
            if !seen.insert(indexer.name) {
                return Err(Error::DuplicateIndexName {
                    table: name,
                    index: indexer.name.to_string(),
                });
            }
        }

        let mut secondary = indexes;
        let Some(position) = secondary.iter().position(|i| i.unique) else {
            return Err(Error::NoUniqueIndex { table: name });
        };
        let primary = secondary.remove(position);

        let state = Arc::new(TableState::empty(secondary.len()));
        Ok(Self {
            inner: Arc::new(TableInner {
                name,
                primary,
                secondary,
                write_lock: Arc::new(tokio::sync::Mutex::new(())),
                committed: parking_lot::Mutex::new(Committed {
                    state,
                    watches: WatchRegistry::default(),
                }),
            }),
        })
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Name of the primary index.
    pub fn primary_index(&self) -> &'static str {
        self.inner.primary.name
    }

    /// Encoded primary key of `object`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPrimaryKey`] unless the primary index yields
    /// exactly one key.
    pub fn primary_key(&self, object: &O) -> Result<Key> {
        let keys = self.inner.primary.keys(object);
        let count = keys.len();
        let mut keys = keys.into_iter();
        match (keys.next(), keys.next()) {
            (Some(key), None) => Ok(key),
            _ => Err(Error::InvalidPrimaryKey {
                table: self.inner.name.clone(),
                count,
            }),
        }
    }

    /// Query the primary index with an already-encoded key.
    pub fn query_primary(&self, key: Key) -> Query<O> {
        Query::new(self.inner.primary.name, key)
    }

    pub(crate) fn resolve(&self, index: &str) -> Result<IndexRef> {
        if index == self.inner.primary.name {
            return Ok(IndexRef::Primary);
        }
        if index == REVISION_INDEX {
            return Ok(IndexRef::Revision);
        }
        self.inner
            .secondary
            .iter()
            .position(|i| i.name == index)
            .map(|position| IndexRef::Secondary {
                position,
                unique: self.inner.secondary.get(position).is_some_and(|i| i.unique),
            })
            .ok_or_else(|| Error::unknown_index(&self.inner.name, index))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// First object matching `query` exactly.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered or the index is unknown.
    pub fn first<T: Txn>(&self, txn: &T, query: Query<O>) -> Result<Option<(O, Revision)>> {
        Ok(self.get(txn, query)?.next())
    }

    /// Like [`first`](Self::first), plus a watch on the query's key.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered or the index is unknown.
    pub fn first_watch<T: Txn>(
        &self,
        txn: &T,
        query: Query<O>,
    ) -> Result<(Option<(O, Revision)>, Watch)> {
        let (mut iter, watch) = self.get_watch(txn, query)?;
        Ok((iter.next(), watch))
    }

    /// All objects whose key in the query's index equals the query key.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered or the index is unknown.
    pub fn get<T: Txn>(&self, txn: &T, query: Query<O>) -> Result<Iter<O>> {
        let state = txn.table_state(self)?;
        let at = self.resolve(query.index())?;
        Ok(Iter::new(state, at, Filter::Exact(query.key().clone())))
    }

    /// Like [`get`](Self::get), plus a watch on the query's key.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered or the index is unknown.
    pub fn get_watch<T: Txn>(&self, txn: &T, query: Query<O>) -> Result<(Iter<O>, Watch)> {
        let state = txn.table_state(self)?;
        let at = self.resolve(query.index())?;
        let target = WatchTarget::Exact {
            index: query.index(),
            key: query.key().clone(),
        };
        let watch = self.watch(&state, at, target);
        Ok((Iter::new(state, at, Filter::Exact(query.key().clone())), watch))
    }

    /// Objects whose key in the query's index starts with the query key.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered or the index is unknown.
    pub fn prefix<T: Txn>(&self, txn: &T, query: Query<O>) -> Result<Iter<O>> {
        let state = txn.table_state(self)?;
        let at = self.resolve(query.index())?;
        Ok(Iter::new(state, at, Filter::Prefix(query.key().clone())))
    }

    /// Like [`prefix`](Self::prefix), plus a watch on the prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered or the index is unknown.
    pub fn prefix_watch<T: Txn>(&self, txn: &T, query: Query<O>) -> Result<(Iter<O>, Watch)> {
        let state = txn.table_state(self)?;
        let at = self.resolve(query.index())?;
        let target = WatchTarget::Prefix {
            index: query.index(),
            key: query.key().clone(),
        };
        let watch = self.watch(&state, at, target);
        Ok((Iter::new(state, at, Filter::Prefix(query.key().clone())), watch))
    }

    /// Objects in index order, starting at the first key `>=` the query key.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered or the index is unknown.
    pub fn lower_bound<T: Txn>(&self, txn: &T, query: Query<O>) -> Result<Iter<O>> {
        let state = txn.table_state(self)?;
        let at = self.resolve(query.index())?;
        Ok(Iter::new(state, at, Filter::From(query.key().clone())))
    }

    /// Like [`lower_bound`](Self::lower_bound), plus a watch on the whole table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered or the index is unknown.
    pub fn lower_bound_watch<T: Txn>(
        &self,
        txn: &T,
        query: Query<O>,
    ) -> Result<(Iter<O>, Watch)> {
        let state = txn.table_state(self)?;
        let at = self.resolve(query.index())?;
        let watch = self.watch(&state, at, WatchTarget::Table);
        Ok((Iter::new(state, at, Filter::From(query.key().clone())), watch))
    }

    /// Every object in primary key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered with the transaction.
    pub fn all<T: Txn>(&self, txn: &T) -> Result<Iter<O>> {
        let state = txn.table_state(self)?;
        Ok(Iter::new(state, IndexRef::Primary, Filter::All))
    }

    /// Like [`all`](Self::all), plus a watch on the whole table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered with the transaction.
    pub fn all_watch<T: Txn>(&self, txn: &T) -> Result<(Iter<O>, Watch)> {
        let state = txn.table_state(self)?;
        let watch = self.watch(&state, IndexRef::Primary, WatchTarget::Table);
        Ok((Iter::new(state, IndexRef::Primary, Filter::All), watch))
    }

    /// Number of objects in the table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered with the transaction.
    pub fn num_objects<T: Txn>(&self, txn: &T) -> Result<usize> {
        Ok(txn.table_state(self)?.primary.len())
    }

    /// Revision of the last commit that changed this table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered with the transaction.
    pub fn revision<T: Txn>(&self, txn: &T) -> Result<Revision> {
        Ok(txn.table_state(self)?.revision)
    }

    /// Register a watch for `target` against the state the caller read.
    ///
    /// If a commit landed after `snapshot` was taken and changed what the
    /// target covers, the returned watch is already closed.
    fn watch(&self, snapshot: &Arc<TableState<O>>, at: IndexRef, target: WatchTarget) -> Watch {
        let mut committed = self.inner.committed.lock();
        let current = committed.state.revision == snapshot.revision
            || match &target {
                WatchTarget::Table => false,
                WatchTarget::Exact { key, .. } => {
                    let filter = Filter::Exact(key.clone());
                    fingerprint(snapshot, at, filter.clone())
                        == fingerprint(&committed.state, at, filter)
                }
                WatchTarget::Prefix { key, .. } => {
                    let filter = Filter::Prefix(key.clone());
                    fingerprint(snapshot, at, filter.clone())
                        == fingerprint(&committed.state, at, filter)
                }
            };

        if current {
            committed.watches.register(target)
        } else {
            Watch::closed()
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert or replace the object with the same primary key.
    ///
    /// Returns the replaced object.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not locked by `txn` or the object's
    /// primary key is invalid.
    pub fn insert(&self, txn: &mut WriteTxn, object: O) -> Result<Option<O>> {
        let pk = self.primary_key(&object)?;
        let pending = txn.pending_mut(self)?;
        Ok(pending.stage_insert(pk, object).map(|row| row.object.clone()))
    }

    /// Replace the object only if its row is still at `revision`.
    ///
    /// Returns the replaced object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectNotFound`] if no row has the object's primary key,
    /// or [`Error::RevisionNotEqual`] if the row changed since `revision`.
    pub fn compare_and_swap(&self, txn: &mut WriteTxn, revision: Revision, object: O) -> Result<O> {
        let pk = self.primary_key(&object)?;
        let pending = txn.pending_mut(self)?;
        let current = pending
            .state
            .primary
            .get(&pk)
            .map(|row| row.revision)
            .ok_or_else(|| Error::object_not_found(&self.inner.name))?;
        self.check_revision(revision, current)?;

        pending
            .stage_insert(pk, object)
            .map(|row| row.object.clone())
            .ok_or_else(|| Error::object_not_found(&self.inner.name))
    }

    /// Remove the object with the same primary key as `object`.
    ///
    /// Returns the removed object, or `None` if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not locked by `txn` or the object's
    /// primary key is invalid.
    pub fn delete(&self, txn: &mut WriteTxn, object: &O) -> Result<Option<O>> {
        let pk = self.primary_key(object)?;
        let pending = txn.pending_mut(self)?;
        Ok(pending.stage_remove(&pk).map(|row| row.object.clone()))
    }

    /// Remove the object matching a primary index query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotPrimaryIndex`] if `query` targets another index.
    pub fn delete_by_key(&self, txn: &mut WriteTxn, query: Query<O>) -> Result<Option<O>> {
        if self.resolve(query.index())? != IndexRef::Primary {
            return Err(Error::NotPrimaryIndex {
                table: self.inner.name.clone(),
                index: query.index().to_string(),
            });
        }
        let pending = txn.pending_mut(self)?;
        Ok(pending.stage_remove(query.key()).map(|row| row.object.clone()))
    }

    /// Remove the object only if its row is still at `revision`.
    ///
    /// Returns `None` if the row is already gone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RevisionNotEqual`] if the row changed since `revision`.
    pub fn compare_and_delete(
        &self,
        txn: &mut WriteTxn,
        revision: Revision,
        object: &O,
    ) -> Result<Option<O>> {
        let pk = self.primary_key(object)?;
        let pending = txn.pending_mut(self)?;
        let Some(current) = pending.state.primary.get(&pk).map(|row| row.revision) else {
            return Ok(None);
        };
        self.check_revision(revision, current)?;
        Ok(pending.stage_remove(&pk).map(|row| row.object.clone()))
    }

    /// Remove every object. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not locked by `txn`.
    pub fn delete_all(&self, txn: &mut WriteTxn) -> Result<usize> {
        let pending = txn.pending_mut(self)?;
        let keys: Vec<Key> = pending.state.primary.keys().cloned().collect();
        Ok(keys
            .iter()
            .filter_map(|pk| pending.stage_remove(pk))
            .count())
    }

    fn check_revision(&self, expected: Revision, actual: Revision) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Error::RevisionNotEqual {
                table: self.inner.name.clone(),
                expected,
                actual,
            })
        }
    }

    pub(crate) fn registered_state(&self) -> Arc<TableState<O>> {
        Arc::clone(&self.inner.committed.lock().state)
    }
}

/// `(primary key, revision)` of every row an iteration would visit.
fn fingerprint<O: Object>(
    state: &Arc<TableState<O>>,
    at: IndexRef,
    filter: Filter,
) -> Vec<(Key, Revision)> {
    Iter::new(Arc::clone(state), at, filter)
        .rows()
        .map(|(pk, row)| (pk, row.revision))
        .collect()
}

impl<O: Object> TableInner<O> {
    /// Add `row` to every index. `previous` is the version it replaces, which
    /// must already be unindexed.
    fn index_row(
        &self,
        state: &mut TableState<O>,
        pk: &Key,
        row: &Row<O>,
        previous: Option<&Row<O>>,
    ) {
        for (indexer, map) in self.secondary.iter().zip(state.secondary.iter_mut()) {
            let kept = previous.map(|p| indexer.keys(&p.object)).unwrap_or_default();
            for key in indexer.keys(&row.object) {
                if indexer.unique {
                    let slot = (key.clone(), Key::empty());
                    // A unique key lost to another object stays lost while
                    // rewrites of this object keep it.
                    if kept.contains(&key) && map.get(&slot).is_some_and(|holder| holder != pk) {
                        continue;
                    }
                    let replaced = map.insert(slot, pk.clone());
                    if let Some(previous) = replaced.filter(|p| p != pk) {
                        debug!(
                            table = %self.name,
                            index = indexer.name,
                            key = %key,
                            replaced = %previous,
                            "Unique index key reassigned"
                        );
                    }
                } else {
                    map.insert((key, pk.clone()), pk.clone());
                }
            }
        }
        state
            .by_revision
            .insert((index::uint64(row.revision), pk.clone()), pk.clone());
    }

    fn unindex_row(&self, state: &mut TableState<O>, pk: &Key, row: &Row<O>) {
        for (indexer, map) in self.secondary.iter().zip(state.secondary.iter_mut()) {
            for key in indexer.keys(&row.object) {
                if indexer.unique {
                    let slot = (key, Key::empty());
                    if map.get(&slot) == Some(pk) {
                        map.remove(&slot);
                    }
                } else {
                    map.remove(&(key, pk.clone()));
                }
            }
        }
        state
            .by_revision
            .remove(&(index::uint64(row.revision), pk.clone()));
    }

    /// Record every index key `object` occupies.
    fn touch(&self, touched: &mut Touched, pk: &Key, object: &O, revision: Revision) {
        touched.add(self.primary.name, pk.clone());
        for indexer in &self.secondary {
            for key in indexer.keys(object) {
                touched.add(indexer.name, key);
            }
        }
        touched.add(REVISION_INDEX, index::uint64(revision));
    }

    fn publish(&self, state: Arc<TableState<O>>, touched: &Touched) {
        let mut committed = self.committed.lock();
        committed.state = state;
        committed.watches.fire(touched);
    }
}

/// Staged changes to one table inside a write transaction.
pub(crate) struct Pending<O> {
    table: Table<O>,
    base: Arc<TableState<O>>,
    pub(crate) state: TableState<O>,
    changed: BTreeSet<Key>,
    provisional: Revision,
}

impl<O: Object> Pending<O> {
    pub(crate) fn new(table: Table<O>, base: Arc<TableState<O>>, provisional: Revision) -> Self {
        let state = TableState::clone(&base);
        Self {
            table,
            base,
            state,
            changed: BTreeSet::new(),
            provisional,
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<TableState<O>> {
        Arc::new(self.state.clone())
    }

    fn stage_insert(&mut self, pk: Key, object: O) -> Option<Arc<Row<O>>> {
        let inner = Arc::clone(&self.table.inner);
        let old = self.state.primary.get(&pk).cloned();
        if let Some(old) = &old {
            inner.unindex_row(&mut self.state, &pk, old);
        }

        let row = Arc::new(Row {
            object,
            revision: self.provisional,
        });
        inner.index_row(&mut self.state, &pk, &row, old.as_deref());
        self.state.primary.insert(pk.clone(), row);
        self.changed.insert(pk);
        old
    }

    fn stage_remove(&mut self, pk: &Key) -> Option<Arc<Row<O>>> {
        let old = self.state.primary.remove(pk)?;
        self.table.inner.unindex_row(&mut self.state, pk, &old);
        self.changed.insert(pk.clone());
        Some(old)
    }

    fn differs(&self, pk: &Key) -> bool {
        match (self.base.primary.get(pk), self.state.primary.get(pk)) {
            (None, None) => false,
            (Some(before), Some(after)) => !Arc::ptr_eq(before, after),
            _ => true,
        }
    }
}

impl<O: Object> PendingTable for Pending<O> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn has_changes(&self) -> bool {
        self.changed.iter().any(|pk| self.differs(pk))
    }

    fn commit(self: Box<Self>, revision: Revision) -> (String, Arc<dyn Any + Send + Sync>) {
        let mut this = *self;
        let inner = Arc::clone(&this.table.inner);
        let mut touched = Touched::default();

        let changed: Vec<Key> = this
            .changed
            .iter()
            .filter(|pk| this.differs(pk))
            .cloned()
            .collect();
        for pk in &changed {
            if let Some(old) = this.base.primary.get(pk) {
                inner.touch(&mut touched, pk, &old.object, old.revision);
            }
            let Some(staged) = this.state.primary.get(pk).cloned() else {
                continue;
            };

            this.state
                .by_revision
                .remove(&(index::uint64(staged.revision), pk.clone()));
            this.state
                .by_revision
                .insert((index::uint64(revision), pk.clone()), pk.clone());
            inner.touch(&mut touched, pk, &staged.object, revision);
            this.state.primary.insert(
                pk.clone(),
                Arc::new(Row {
                    object: staged.object.clone(),
                    revision,
                }),
            );
        }

        this.state.revision = revision;
        let state = Arc::new(this.state);
        inner.publish(Arc::clone(&state), &touched);

        debug!(table = %inner.name, revision, "Published table state");
        (inner.name.clone(), state)
    }
}
