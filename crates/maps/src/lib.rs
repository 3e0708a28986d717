//! Fixed-size key/value maps as a reconciliation target.
//!
//! [`Map`] behaves like a kernel hash map: fixed key and value sizes, a bound
//! on entries and explicit open/close. [`MapOps`] lets a reconciler keep a
//! map in sync with a table whose objects implement [`BinaryKeyValue`].

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod codec;
pub mod error;
pub mod map;
pub mod ops;

// Re-export main types
pub use codec::BinaryKeyValue;
pub use error::{MapError, Result};
pub use map::{Map, MapSpec};
pub use ops::MapOps;
