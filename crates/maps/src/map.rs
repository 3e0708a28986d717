//! A fixed-size hash map that emulates a kernel map.
//!
//! Keys and values have the fixed sizes declared in the [`MapSpec`], the
//! number of entries is bounded, and the map must be opened before use.

use std::collections::BTreeMap;

use itertools::Itertools;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codec;
use crate::error::{MapError, Result};

/// Shape of a map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSpec {
    pub name: String,
    /// Encoded key size in bytes.
    pub key_size: usize,
    /// Encoded value size in bytes.
    pub value_size: usize,
    pub max_entries: usize,
}

impl MapSpec {
    pub fn new(name: impl Into<String>, key_size: usize, value_size: usize, max_entries: usize) -> Self {
        Self {
            name: name.into(),
            key_size,
            value_size,
            max_entries,
        }
    }

    /// Check the spec is usable.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidSpec`] for an empty name or a zero size.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(MapError::invalid_spec("map name must not be empty"));
        }
        if self.key_size == 0 || self.value_size == 0 {
            return Err(MapError::invalid_spec(format!(
                "map '{}' needs non-zero key and value sizes",
                self.name
            )));
        }
        if self.max_entries == 0 {
            return Err(MapError::invalid_spec(format!(
                "map '{}' needs a positive max_entries",
                self.name
            )));
        }
        Ok(())
    }
}

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

/// Key/value map with fixed-size entries.
#[derive(Debug)]
pub struct Map {
    spec: MapSpec,
    entries: RwLock<Option<Entries>>,
}

impl Map {
    /// Create a closed map.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidSpec`] if `spec` does not validate.
    pub fn new(spec: MapSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            spec,
            entries: RwLock::new(None),
        })
    }

    pub const fn spec(&self) -> &MapSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Open the map, creating its storage if it has none. Opening an open map
    /// keeps its entries.
    pub fn open_or_create(&self) {
        let mut entries = self.entries.write();
        if entries.is_none() {
            *entries = Some(BTreeMap::new());
            info!(map = %self.spec.name, max_entries = self.spec.max_entries, "Map created");
        }
    }

    /// Close the map and release its entries.
    pub fn close(&self) {
        if self.entries.write().take().is_some() {
            info!(map = %self.spec.name, "Map closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.entries.read().is_some()
    }

    fn not_open(&self) -> MapError {
        MapError::NotOpen {
            name: self.spec.name.clone(),
        }
    }

    fn check_size(&self, what: &'static str, expected: usize, bytes: &[u8]) -> Result<()> {
        if bytes.len() == expected {
            Ok(())
        } else {
            Err(MapError::SizeMismatch {
                name: self.spec.name.clone(),
                what,
                expected,
                actual: bytes.len(),
            })
        }
    }

    /// Value stored under an encoded key.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::KeyNotExist`] if the key is absent, or an error if
    /// the map is closed or the key has the wrong size.
    pub fn lookup_bytes(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_size("key", self.spec.key_size, key)?;
        let entries = self.entries.read();
        let entries = entries.as_ref().ok_or_else(|| self.not_open())?;
        entries.get(key).cloned().ok_or(MapError::KeyNotExist)
    }

    /// Insert or replace an encoded entry.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Full`] when inserting a new key into a full map, or
    /// an error if the map is closed or a size is wrong.
    pub fn update_bytes(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_size("key", self.spec.key_size, key)?;
        self.check_size("value", self.spec.value_size, value)?;
        let mut entries = self.entries.write();
        let entries = entries.as_mut().ok_or_else(|| self.not_open())?;
        if !entries.contains_key(key) && entries.len() >= self.spec.max_entries {
            return Err(MapError::Full {
                name: self.spec.name.clone(),
                max_entries: self.spec.max_entries,
            });
        }
        entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    /// Remove an encoded key.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::KeyNotExist`] if the key is absent, or an error if
    /// the map is closed or the key has the wrong size.
    pub fn delete_bytes(&self, key: &[u8]) -> Result<()> {
        self.check_size("key", self.spec.key_size, key)?;
        let mut entries = self.entries.write();
        let entries = entries.as_mut().ok_or_else(|| self.not_open())?;
        entries.remove(key).map(|_| ()).ok_or(MapError::KeyNotExist)
    }

    /// Typed lookup.
    ///
    /// # Errors
    ///
    /// As [`lookup_bytes`](Self::lookup_bytes), plus codec failures.
    pub fn lookup<K: Serialize, V: DeserializeOwned>(&self, key: &K) -> Result<V> {
        codec::decode(&self.lookup_bytes(&codec::encode(key)?)?)
    }

    /// Typed insert or replace.
    ///
    /// # Errors
    ///
    /// As [`update_bytes`](Self::update_bytes), plus codec failures.
    pub fn update<K: Serialize, V: Serialize>(&self, key: &K, value: &V) -> Result<()> {
        self.update_bytes(&codec::encode(key)?, &codec::encode(value)?)
    }

    /// Typed delete.
    ///
    /// # Errors
    ///
    /// As [`delete_bytes`](Self::delete_bytes), plus codec failures.
    pub fn delete<K: Serialize>(&self, key: &K) -> Result<()> {
        self.delete_bytes(&codec::encode(key)?)
    }

    /// Encoded keys in byte order.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::NotOpen`] if the map is closed.
    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        let entries = self.entries.read();
        let entries = entries.as_ref().ok_or_else(|| self.not_open())?;
        Ok(entries.keys().cloned().collect())
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::NotOpen`] if the map is closed.
    pub fn len(&self) -> Result<usize> {
        let entries = self.entries.read();
        entries.as_ref().map(BTreeMap::len).ok_or_else(|| self.not_open())
    }

    /// Whether the map holds no entries.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::NotOpen`] if the map is closed.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Hex dump of every entry, keyed by the hex key.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::NotOpen`] if the map is closed.
    pub fn dump(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let entries = self.entries.read();
        let entries = entries.as_ref().ok_or_else(|| self.not_open())?;
        let dump: BTreeMap<_, _> = entries
            .iter()
            .map(|(key, value)| (hex(key), vec![hex(value)]))
            .collect();
        debug!(map = %self.spec.name, entries = dump.len(), "Map dumped");
        Ok(dump)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).join(" ")
}
