//! The desired-state table and map shape used by the binary.

use std::sync::Arc;

use converge_maps::{BinaryKeyValue, MapSpec};
use converge_reconciler::{Config, Operations, Status, StatusKind, Timings};
use converge_statedb::{Database, Index, KeySet, Table, index};
use serde::{Deserialize, Serialize};

/// Settings read from `--config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub reconciler: Timings,
    pub map_name: String,
    pub max_entries: usize,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            reconciler: Timings::default(),
            map_name: "converge_demo".to_string(),
            max_entries: 1024,
        }
    }
}

impl DemoConfig {
    /// Key and value are one big-endian `u32` each.
    pub fn map_spec(&self) -> MapSpec {
        MapSpec::new(self.map_name.clone(), 4, 4, self.max_entries)
    }

    /// Check that `objects` entries fit the configured map.
    ///
    /// # Errors
    ///
    /// Returns [`converge_core::Error::InvalidConfig`] if they do not.
    pub fn check_capacity(&self, objects: usize) -> converge_core::Result<()> {
        if objects > self.max_entries {
            return Err(converge_core::Error::invalid_config(format!(
                "{objects} objects do not fit map '{}' of {} entries",
                self.map_name, self.max_entries
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryKey(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryValue(pub u32);

/// One desired map entry.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: EntryKey,
    pub value: EntryValue,
    pub status: Status,
}

impl Entry {
    pub fn new(key: u32, value: u32, status: Status) -> Self {
        Self {
            key: EntryKey(key),
            value: EntryValue(value),
            status,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status.kind == StatusKind::Done
    }
}

impl BinaryKeyValue for Entry {
    type Key = EntryKey;
    type Value = EntryValue;

    fn binary_key(&self) -> &EntryKey {
        &self.key
    }

    fn binary_value(&self) -> &EntryValue {
        &self.value
    }
}

pub const BY_KEY: Index<Entry, u32> = Index {
    name: "key",
    from_object: |e| KeySet::single(index::uint32(e.key.0)),
    from_key: |k| index::uint32(*k),
    unique: true,
};

/// Create and register the entry table.
///
/// # Errors
///
/// Returns an error if the table is invalid or already registered.
pub fn register_entries(db: &Database) -> converge_statedb::Result<Table<Entry>> {
    let table = Table::new("entries", vec![BY_KEY.indexer()])?;
    db.register_table(&table)?;
    Ok(table)
}

/// Reconciler configuration for the entry table.
pub fn reconciler_config(timings: Timings, operations: Arc<dyn Operations<Entry>>) -> Config<Entry> {
    timings.into_config(
        Arc::new(|entry: &Entry| entry.status.clone()),
        Arc::new(|entry: &Entry, status| Entry {
            status,
            ..entry.clone()
        }),
        operations,
    )
}
