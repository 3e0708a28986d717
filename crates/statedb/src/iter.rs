//! Lazy cursors over a table snapshot.

use std::ops::Bound;
use std::sync::Arc;

use crate::index::Key;
use crate::table::{IndexRef, Row, TableState};
use crate::Revision;

/// Which keys an iteration visits, in index order.
#[derive(Debug, Clone)]
pub(crate) enum Filter {
    /// Every key.
    All,
    /// Keys `>=` the given key.
    From(Key),
    /// Keys equal to the given key.
    Exact(Key),
    /// Keys starting with the given key.
    Prefix(Key),
}

impl Filter {
    fn start(&self) -> Option<&Key> {
        match self {
            Self::All => None,
            Self::From(key) | Self::Exact(key) | Self::Prefix(key) => Some(key),
        }
    }

    /// Whether `key` is still in range. Keys arrive in order, so the first
    /// rejected key ends the iteration.
    fn accepts(&self, key: &Key) -> bool {
        match self {
            Self::All | Self::From(_) => true,
            Self::Exact(wanted) => key == wanted,
            Self::Prefix(prefix) => key.starts_with(prefix),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Secondary(usize),
    Revision,
}

enum Cursor {
    Primary(Bound<Key>),
    Index { slot: Slot, next: Bound<(Key, Key)> },
}

/// Iterator over `(object, revision)` pairs of a table snapshot.
///
/// The iterator owns its snapshot: later commits, and later writes in the
/// transaction it came from, are not visible through it.
pub struct Iter<O> {
    state: Arc<TableState<O>>,
    cursor: Cursor,
    filter: Filter,
    done: bool,
}

impl<O> std::fmt::Debug for Iter<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iter")
            .field("revision", &self.state.revision)
            .field("filter", &self.filter)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<O: Clone> Iter<O> {
    pub(crate) fn new(state: Arc<TableState<O>>, at: IndexRef, filter: Filter) -> Self {
        let start = filter.start().cloned();
        let cursor = match at {
            IndexRef::Primary => Cursor::Primary(start.map_or(Bound::Unbounded, Bound::Included)),
            IndexRef::Secondary { position, .. } => Cursor::Index {
                slot: Slot::Secondary(position),
                next: index_start(start),
            },
            IndexRef::Revision => Cursor::Index {
                slot: Slot::Revision,
                next: index_start(start),
            },
        };
        Self {
            state,
            cursor,
            filter,
            done: false,
        }
    }

    /// Iterate primary keys and rows instead of cloned objects.
    pub(crate) fn rows(self) -> Rows<O> {
        Rows(self)
    }

    fn next_row(&mut self) -> Option<(Key, Arc<Row<O>>)> {
        loop {
            if self.done {
                return None;
            }
            let state = &self.state;

            match &mut self.cursor {
                Cursor::Primary(bound) => {
                    let found = state
                        .primary
                        .range((bound.clone(), Bound::Unbounded))
                        .next()
                        .map(|(pk, row)| (pk.clone(), Arc::clone(row)));
                    match found {
                        Some((pk, row)) if self.filter.accepts(&pk) => {
                            *bound = Bound::Excluded(pk.clone());
                            return Some((pk, row));
                        }
                        _ => self.done = true,
                    }
                }
                Cursor::Index { slot, next } => {
                    let map = match *slot {
                        Slot::Secondary(position) => state.secondary.get(position),
                        Slot::Revision => Some(&state.by_revision),
                    };
                    let found = map.and_then(|map| {
                        map.range((next.clone(), Bound::Unbounded))
                            .next()
                            .map(|(entry, pk)| (entry.clone(), pk.clone()))
                    });
                    match found {
                        Some((entry, pk)) if self.filter.accepts(&entry.0) => {
                            *next = Bound::Excluded(entry);
                            // Entries without a live row are skipped.
                            if let Some(row) = state.primary.get(&pk) {
                                return Some((pk, Arc::clone(row)));
                            }
                        }
                        _ => self.done = true,
                    }
                }
            }
        }
    }
}

fn index_start(start: Option<Key>) -> Bound<(Key, Key)> {
    start.map_or(Bound::Unbounded, |key| Bound::Included((key, Key::empty())))
}

impl<O: Clone> Iterator for Iter<O> {
    type Item = (O, Revision);

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row()
            .map(|(_, row)| (row.object.clone(), row.revision))
    }
}

/// Rows of an [`Iter`] with their primary keys.
pub(crate) struct Rows<O>(Iter<O>);

impl<O: Clone> Iterator for Rows<O> {
    type Item = (Key, Arc<Row<O>>);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next_row()
    }
}
