//! Watch handles returned with query results.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use common::{BY_DEVICE, BY_PREFIX, Route, insert_all, setup};
use converge_statedb::{Query, WatchSet};

#[tokio::test]
async fn test_watch_fires_on_change_to_key() {
    let (db, table) = setup();
    insert_all(&db, &table, vec![Route::new(1, "eth0"), Route::new(2, "eth0")]).await;

    let (_, watch_one) = table.first_watch(&db.read_txn(), BY_PREFIX.query(&1)).unwrap();
    let (_, watch_two) = table.first_watch(&db.read_txn(), BY_PREFIX.query(&2)).unwrap();
    assert!(!watch_one.is_ready());

    insert_all(&db, &table, vec![Route::new(1, "eth1")]).await;

    assert!(watch_one.is_ready());
    assert!(!watch_two.is_ready());
}

#[tokio::test]
async fn test_watch_on_absent_key_fires_on_insert() {
    let (db, table) = setup();
    let (found, mut watch) = table.first_watch(&db.read_txn(), BY_PREFIX.query(&9)).unwrap();
    assert!(found.is_none());

    let writer = {
        let db = db.clone();
        let table = table.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            insert_all(&db, &table, vec![Route::new(9, "eth0")]).await;
        })
    };

    tokio::time::timeout(Duration::from_secs(5), watch.ready())
        .await
        .expect("watch should fire after insert");
    writer.await.unwrap();
}

#[tokio::test]
async fn test_watch_fires_on_delete() {
    let (db, table) = setup();
    insert_all(&db, &table, vec![Route::new(1, "eth0")]).await;
    let (_, watch) = table.first_watch(&db.read_txn(), BY_PREFIX.query(&1)).unwrap();

    let mut txn = db.write_txn(&[&table]).await.unwrap();
    table.delete(&mut txn, &Route::new(1, "eth0")).unwrap();
    txn.commit();

    assert!(watch.is_ready());
}

#[tokio::test]
async fn test_secondary_watch_fires_when_object_leaves_key() {
    let (db, table) = setup();
    insert_all(&db, &table, vec![Route::new(1, "eth0")]).await;
    let (iter, watch) = table.get_watch(&db.read_txn(), BY_DEVICE.query("eth0")).unwrap();
    assert_eq!(iter.count(), 1);

    // Moving the route to another device changes the "eth0" result.
    insert_all(&db, &table, vec![Route::new(1, "eth1")]).await;
    assert!(watch.is_ready());
}

#[tokio::test]
async fn test_prefix_watch() {
    let (db, table) = setup();
    let (_, eth) = table.prefix_watch(&db.read_txn(), BY_DEVICE.query("eth")).unwrap();
    let (_, wlan) = table.prefix_watch(&db.read_txn(), BY_DEVICE.query("wlan")).unwrap();

    insert_all(&db, &table, vec![Route::new(1, "eth3")]).await;

    assert!(eth.is_ready());
    assert!(!wlan.is_ready());
}

#[tokio::test]
async fn test_table_watch_fires_on_any_commit() {
    let (db, table) = setup();
    let (_, watch) = table.all_watch(&db.read_txn()).unwrap();
    let (_, changes) = table
        .lower_bound_watch(&db.read_txn(), Query::revision(1))
        .unwrap();

    insert_all(&db, &table, vec![Route::new(77, "lo")]).await;

    assert!(watch.is_ready());
    assert!(changes.is_ready());
}

#[tokio::test]
async fn test_empty_commit_does_not_fire() {
    let (db, table) = setup();
    let (_, watch) = table.all_watch(&db.read_txn()).unwrap();

    let txn = db.write_txn(&[&table]).await.unwrap();
    txn.commit();

    assert!(!watch.is_ready());
}

#[tokio::test]
async fn test_stale_snapshot_yields_closed_watch() {
    let (db, table) = setup();
    insert_all(&db, &table, vec![Route::new(1, "eth0")]).await;
    let stale = db.read_txn();

    insert_all(&db, &table, vec![Route::new(1, "eth1")]).await;

    // The change landed between the read and the registration.
    let (found, watch) = table.first_watch(&stale, BY_PREFIX.query(&1)).unwrap();
    assert_eq!(found.unwrap().0.device, "eth0");
    assert!(watch.is_ready());
}

#[tokio::test]
async fn test_stale_snapshot_for_unrelated_key_registers() {
    let (db, table) = setup();
    insert_all(&db, &table, vec![Route::new(1, "eth0")]).await;
    let stale = db.read_txn();

    insert_all(&db, &table, vec![Route::new(2, "eth1")]).await;

    let (_, watch) = table.first_watch(&stale, BY_PREFIX.query(&1)).unwrap();
    assert!(!watch.is_ready());

    insert_all(&db, &table, vec![Route::new(1, "eth2")]).await;
    assert!(watch.is_ready());
}

#[tokio::test]
async fn test_watch_set_wait() {
    let (db, table) = setup();
    let rtxn = db.read_txn();
    let mut set = WatchSet::new();
    for prefix in [10, 20, 30] {
        let (_, watch) = table.first_watch(&rtxn, BY_PREFIX.query(&prefix)).unwrap();
        set.add(watch);
    }
    assert_eq!(set.len(), 3);

    insert_all(&db, &table, vec![Route::new(20, "eth0")]).await;

    let fired = tokio::time::timeout(Duration::from_secs(5), set.wait())
        .await
        .unwrap();
    assert_eq!(fired, Some(1));
}
