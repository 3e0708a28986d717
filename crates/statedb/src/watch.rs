//! Change notification.
//!
//! A [`Watch`] is the receiving half of a tokio `watch` channel that is never
//! sent on. Firing a watch drops its sender, which closes the channel and
//! wakes every receiver at once. Closed watches stay closed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::sync::watch;
use tracing::trace;

use crate::index::Key;

/// Registered senders below this count are never swept.
const MIN_SWEEP: usize = 64;

/// Handle that becomes ready once a commit may have changed the query result
/// it was returned with.
#[derive(Debug, Clone)]
pub struct Watch {
    rx: watch::Receiver<()>,
}

impl Watch {
    /// A watch that is already ready.
    ///
    /// Returned when the result is known to be stale at registration time.
    pub fn closed() -> Self {
        let (tx, rx) = watch::channel(());
        drop(tx);
        Self { rx }
    }

    /// Check without waiting.
    pub fn is_ready(&self) -> bool {
        self.rx.has_changed().is_err()
    }

    /// Wait until the watch fires.
    pub async fn ready(&mut self) {
        while self.rx.changed().await.is_ok() {}
    }
}

/// A group of watches waited on together.
#[derive(Debug, Default)]
pub struct WatchSet {
    watches: Vec<Watch>,
}

impl WatchSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a watch to the set.
    pub fn add(&mut self, watch: Watch) {
        self.watches.push(watch);
    }

    /// Number of watches in the set.
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Check if any watch has fired, without waiting.
    pub fn any_ready(&self) -> bool {
        self.watches.iter().any(Watch::is_ready)
    }

    /// Remove every watch.
    pub fn clear(&mut self) {
        self.watches.clear();
    }

    /// Wait until one watch fires and return its position.
    ///
    /// Returns `None` immediately for an empty set. Compose with timers or
    /// cancellation through `tokio::select!`.
    pub async fn wait(&mut self) -> Option<usize> {
        if self.watches.is_empty() {
            return None;
        }
        let pending = self.watches.iter_mut().map(|w| Box::pin(w.ready()));
        let ((), position, _) = futures::future::select_all(pending).await;
        Some(position)
    }
}

/// What a registered watch observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WatchTarget {
    /// Any change to the table.
    Table,
    /// Changes to rows holding exactly `key` in `index`.
    Exact { index: &'static str, key: Key },
    /// Changes to rows holding a key under `key` in `index`.
    Prefix { index: &'static str, key: Key },
}

/// Index keys occupied by rows a commit changed, before or after the change.
#[derive(Debug, Default)]
pub(crate) struct Touched {
    keys: BTreeMap<&'static str, BTreeSet<Key>>,
}

impl Touched {
    pub(crate) fn add(&mut self, index: &'static str, key: Key) {
        self.keys.entry(index).or_default().insert(key);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn hits_prefix(&self, index: &str, prefix: &Key) -> bool {
        self.keys
            .get(index)
            .is_some_and(|keys| keys.iter().any(|k| k.starts_with(prefix)))
    }
}

/// Live senders of one table.
#[derive(Debug, Default)]
pub(crate) struct WatchRegistry {
    table: Option<watch::Sender<()>>,
    exact: HashMap<(&'static str, Key), watch::Sender<()>>,
    prefix: Vec<(&'static str, Key, watch::Sender<()>)>,
    sweep_at: usize,
}

impl WatchRegistry {
    pub(crate) fn register(&mut self, target: WatchTarget) -> Watch {
        self.maybe_sweep();

        let rx = match target {
            WatchTarget::Table => self.table.get_or_insert_with(new_sender).subscribe(),
            WatchTarget::Exact { index, key } => self
                .exact
                .entry((index, key))
                .or_insert_with(new_sender)
                .subscribe(),
            WatchTarget::Prefix { index, key } => {
                let existing = self
                    .prefix
                    .iter()
                    .find(|(i, k, _)| *i == index && *k == key)
                    .map(|(_, _, tx)| tx.subscribe());
                if let Some(rx) = existing {
                    rx
                } else {
                    let tx = new_sender();
                    let rx = tx.subscribe();
                    self.prefix.push((index, key, tx));
                    rx
                }
            }
        };

        Watch { rx }
    }

    /// Close every watch whose target intersects `touched`.
    pub(crate) fn fire(&mut self, touched: &Touched) {
        if touched.is_empty() {
            return;
        }
        let before = self.len();

        self.table = None;
        for (index, keys) in &touched.keys {
            for key in keys {
                self.exact.remove(&(*index, key.clone()));
            }
        }
        self.prefix
            .retain(|(index, prefix, _)| !touched.hits_prefix(index, prefix));

        trace!(fired = before.saturating_sub(self.len()), "Fired watches");
    }

    pub(crate) fn len(&self) -> usize {
        usize::from(self.table.is_some())
            .saturating_add(self.exact.len())
            .saturating_add(self.prefix.len())
    }

    fn maybe_sweep(&mut self) {
        if self.len() < self.sweep_at.max(MIN_SWEEP) {
            return;
        }
        self.exact.retain(|_, tx| tx.receiver_count() > 0);
        self.prefix.retain(|(_, _, tx)| tx.receiver_count() > 0);
        if self.table.as_ref().is_some_and(|tx| tx.receiver_count() == 0) {
            self.table = None;
        }
        self.sweep_at = self.len().saturating_mul(2);
    }
}

fn new_sender() -> watch::Sender<()> {
    watch::channel(()).0
}
