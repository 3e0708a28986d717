//! Shared fixtures: an entry table keyed by `u32` and an in-memory resource
//! that records what the reconciler did to it.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use converge_reconciler::{
    BatchEntry, BatchOperations, Config, Error, Objects, Operations, Result, Status, StatusKind,
};
use converge_statedb::{Database, Index, KeySet, ReadTxn, Table, index};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct Entry {
    pub key: u32,
    pub value: u32,
    pub status: Status,
}

impl Entry {
    pub fn pending(key: u32, value: u32) -> Self {
        Self {
            key,
            value,
            status: Status::pending(),
        }
    }

    pub fn pending_delete(key: u32, value: u32) -> Self {
        Self {
            key,
            value,
            status: Status::pending_delete(),
        }
    }
}

pub const BY_KEY: Index<Entry, u32> = Index {
    name: "key",
    from_object: |e| KeySet::single(index::uint32(e.key)),
    from_key: |k| index::uint32(*k),
    unique: true,
};

pub fn setup() -> (Database, Table<Entry>) {
    let db = Database::new();
    let table = Table::new("entries", vec![BY_KEY.indexer()]).expect("entry table should be valid");
    db.register_table(&table).expect("registration should succeed");
    (db, table)
}

pub async fn write(db: &Database, table: &Table<Entry>, entries: Vec<Entry>) {
    let mut txn = db.write_txn(&[table]).await.expect("write txn");
    for entry in entries {
        table.insert(&mut txn, entry).expect("insert");
    }
    txn.commit();
}

pub fn lookup(db: &Database, table: &Table<Entry>, key: u32) -> Option<Entry> {
    table
        .first(&db.read_txn(), BY_KEY.query(&key))
        .expect("lookup")
        .map(|(entry, _)| entry)
}

pub fn status_kind(db: &Database, table: &Table<Entry>, key: u32) -> Option<StatusKind> {
    lookup(db, table, key).map(|e| e.status.kind)
}

/// Wait until the row for `key` satisfies `pred`, using table watches.
pub async fn wait_for(
    db: &Database,
    table: &Table<Entry>,
    key: u32,
    pred: impl Fn(Option<&Entry>) -> bool,
) {
    let waiting = async {
        loop {
            let (found, mut watch) = table
                .first_watch(&db.read_txn(), BY_KEY.query(&key))
                .expect("lookup");
            if pred(found.as_ref().map(|(entry, _)| entry)) {
                return;
            }
            watch.ready().await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("row should reach the expected state");
}

/// In-memory key/value resource.
#[derive(Default)]
pub struct FakeResource {
    pub entries: Mutex<BTreeMap<u32, u32>>,
    /// Number of upcoming updates that fail.
    pub fail_updates: AtomicUsize,
    pub fail_prune: AtomicBool,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
    pub prunes: AtomicUsize,
    pub batches: AtomicUsize,
}

impl FakeResource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> BTreeMap<u32, u32> {
        self.entries.lock().clone()
    }

    pub fn set(&self, key: u32, value: u32) {
        self.entries.lock().insert(key, value);
    }

    fn apply(&self, entry: &Entry) -> Result<bool> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .fail_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::operation("update", "injected failure"));
        }
        let previous = self.entries.lock().insert(entry.key, entry.value);
        Ok(previous != Some(entry.value))
    }

    fn remove(&self, entry: &Entry) {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().remove(&entry.key);
    }
}

#[async_trait]
impl Operations<Entry> for FakeResource {
    async fn update(&self, _txn: &ReadTxn, object: &Entry) -> Result<bool> {
        self.apply(object)
    }

    async fn delete(&self, _txn: &ReadTxn, object: &Entry) -> Result<()> {
        self.remove(object);
        Ok(())
    }

    async fn prune(&self, _txn: &ReadTxn, objects: Objects<'_, Entry>) -> Result<()> {
        self.prunes.fetch_add(1, Ordering::SeqCst);
        if self.fail_prune.load(Ordering::SeqCst) {
            return Err(Error::operation("prune", "injected failure"));
        }
        let desired: Vec<u32> = objects.map(|(entry, _)| entry.key).collect();
        self.entries.lock().retain(|key, _| desired.contains(key));
        Ok(())
    }
}

#[async_trait]
impl BatchOperations<Entry> for FakeResource {
    async fn update_batch(&self, _txn: &ReadTxn, batch: &mut [BatchEntry<Entry>]) {
        self.batches.fetch_add(1, Ordering::SeqCst);
        for entry in batch.iter_mut() {
            entry.result = self.apply(&entry.object).map(|_| ());
        }
    }

    async fn delete_batch(&self, _txn: &ReadTxn, batch: &mut [BatchEntry<Entry>]) {
        self.batches.fetch_add(1, Ordering::SeqCst);
        for entry in batch.iter() {
            self.remove(&entry.object);
        }
    }
}

pub fn config(ops: Arc<dyn Operations<Entry>>) -> Config<Entry> {
    let mut config = Config::new(
        |e: &Entry| e.status.clone(),
        |e: &Entry, status| Entry {
            status,
            ..e.clone()
        },
        ops,
    );
    config.retry_backoff_min_duration = Duration::from_millis(100);
    config.retry_backoff_max_duration = Duration::from_secs(10);
    config
}
