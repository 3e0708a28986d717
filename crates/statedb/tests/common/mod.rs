//! Shared fixtures: a route table with a unique primary index on the prefix
//! and a non-unique secondary index on the interface name.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use converge_statedb::{Database, Index, KeySet, Table, index};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: u32,
    pub device: String,
    pub metric: i64,
}

impl Route {
    pub fn new(prefix: u32, device: &str) -> Self {
        Self {
            prefix,
            device: device.to_string(),
            metric: 0,
        }
    }

    pub fn with_metric(mut self, metric: i64) -> Self {
        self.metric = metric;
        self
    }
}

pub const BY_PREFIX: Index<Route, u32> = Index {
    name: "prefix",
    from_object: |r| KeySet::single(index::uint32(r.prefix)),
    from_key: |p| index::uint32(*p),
    unique: true,
};

pub const BY_DEVICE: Index<Route, str> = Index {
    name: "device",
    from_object: |r| KeySet::single(index::string(&r.device)),
    from_key: index::string,
    unique: false,
};

pub const BY_METRIC: Index<Route, i64> = Index {
    name: "metric",
    from_object: |r| KeySet::single(index::int64(r.metric)),
    from_key: |m| index::int64(*m),
    unique: true,
};

pub fn routes_table(name: &str) -> Table<Route> {
    Table::new(
        name,
        vec![BY_PREFIX.indexer(), BY_DEVICE.indexer()],
    )
    .expect("route table should be valid")
}

pub fn setup() -> (Database, Table<Route>) {
    let db = Database::new();
    let table = routes_table("routes");
    db.register_table(&table)
        .expect("registration should succeed");
    (db, table)
}

pub async fn insert_all(db: &Database, table: &Table<Route>, routes: Vec<Route>) {
    let mut txn = db.write_txn(&[table]).await.expect("write txn");
    for route in routes {
        table.insert(&mut txn, route).expect("insert");
    }
    txn.commit();
}
