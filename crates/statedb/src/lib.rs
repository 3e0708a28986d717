//! In-memory, versioned, indexed and watchable tables.
//!
//! This crate holds desired state for reconcilers. Key features:
//!
//! - **Tables**: ordered collections of one object type with a unique primary
//!   index, optional secondary indexes and a built-in revision index
//! - **Transactions**: lock-free read snapshots and per-table write
//!   transactions that commit atomically
//! - **Revisions**: a global counter stamped on every changed row at commit
//! - **Watches**: handles that become ready when a commit could change a
//!   query's result
//!
//! # Example
//!
//! ```ignore
//! use converge_statedb::{index, Database, Index, KeySet, Table};
//!
//! #[derive(Clone)]
//! struct Route { prefix: u32, via: String }
//!
//! #[tokio::main]
//! async fn main() -> converge_statedb::Result<()> {
//!     let by_prefix = Index::<Route, u32> {
//!         name: "prefix",
//!         from_object: |r| KeySet::single(index::uint32(r.prefix)),
//!         from_key: |p| index::uint32(*p),
//!         unique: true,
//!     };
//!     let routes = Table::new("routes", vec![by_prefix.indexer()])?;
//!
//!     let db = Database::new();
//!     db.register_table(&routes)?;
//!
//!     let mut txn = db.write_txn(&[&routes]).await?;
//!     routes.insert(&mut txn, Route { prefix: 10, via: "eth0".into() })?;
//!     let snapshot = txn.commit();
//!
//!     let (found, watch) = routes.first_watch(&snapshot, by_prefix.query(&10))?;
//!     assert!(found.is_some());
//!     assert!(!watch.is_ready());
//!     Ok(())
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod db;
pub mod error;
pub mod index;
pub mod iter;
pub mod table;
pub mod txn;
pub mod watch;

/// Global commit counter. Every row carries the revision that last changed it.
pub type Revision = u64;

// Re-export main types
pub use db::Database;
pub use error::{Error, Result};
pub use index::{Index, Indexer, Key, KeySet, Query, REVISION_INDEX};
pub use iter::Iter;
pub use table::{Object, Table, TableMeta};
pub use txn::{ReadTxn, Txn, WriteTxn};
pub use watch::{Watch, WatchSet};
