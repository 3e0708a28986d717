//! Reconciler operations backed by a [`Map`].

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use converge_reconciler::{BatchEntry, BatchOperations, Objects, Operations, Result};
use converge_statedb::{Object, ReadTxn};
use tracing::debug;

use crate::codec::{self, BinaryKeyValue};
use crate::error::MapError;
use crate::map::Map;

/// Writes objects of type `O` into a map, one entry per object.
pub struct MapOps<O> {
    map: Arc<Map>,
    _object: PhantomData<fn(&O)>,
}

impl<O> MapOps<O> {
    pub const fn new(map: Arc<Map>) -> Self {
        Self {
            map,
            _object: PhantomData,
        }
    }

    pub const fn map(&self) -> &Arc<Map> {
        &self.map
    }
}

impl<O> std::fmt::Debug for MapOps<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapOps").field("map", &self.map.name()).finish()
    }
}

impl<O: BinaryKeyValue> MapOps<O> {
    fn apply(&self, object: &O) -> std::result::Result<bool, MapError> {
        let key = codec::encode(object.binary_key())?;
        let value = codec::encode(object.binary_value())?;
        match self.map.lookup_bytes(&key) {
            Ok(current) if current == value => return Ok(false),
            Ok(_) => {}
            Err(e) if e.is_key_not_exist() => {}
            Err(e) => return Err(e),
        }
        self.map.update_bytes(&key, &value)?;
        Ok(true)
    }

    fn remove(&self, object: &O) -> std::result::Result<(), MapError> {
        let key = codec::encode(object.binary_key())?;
        match self.map.delete_bytes(&key) {
            Err(e) if e.is_key_not_exist() => Ok(()),
            other => other,
        }
    }
}

#[async_trait]
impl<O: Object + BinaryKeyValue> Operations<O> for MapOps<O> {
    async fn update(&self, _txn: &ReadTxn, object: &O) -> Result<bool> {
        self.apply(object).map_err(|e| e.into_operation("update"))
    }

    async fn delete(&self, _txn: &ReadTxn, object: &O) -> Result<()> {
        self.remove(object).map_err(|e| e.into_operation("delete"))
    }

    async fn prune(&self, _txn: &ReadTxn, objects: Objects<'_, O>) -> Result<()> {
        let desired = objects
            .map(|(object, _)| codec::encode(object.binary_key()))
            .collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(|e| e.into_operation("prune"))?;

        let stale: Vec<Vec<u8>> = self
            .map
            .keys()
            .map_err(|e| e.into_operation("prune"))?
            .into_iter()
            .filter(|key| !desired.contains(key))
            .collect();

        for key in &stale {
            match self.map.delete_bytes(key) {
                Ok(()) => {}
                Err(e) if e.is_key_not_exist() => {}
                Err(e) => return Err(e.into_operation("prune")),
            }
        }
        debug!(map = %self.map.name(), desired = desired.len(), removed = stale.len(), "Map pruned");
        Ok(())
    }
}

#[async_trait]
impl<O: Object + BinaryKeyValue> BatchOperations<O> for MapOps<O> {
    async fn update_batch(&self, _txn: &ReadTxn, batch: &mut [BatchEntry<O>]) {
        for entry in batch.iter_mut() {
            entry.result = self
                .apply(&entry.object)
                .map(|_| ())
                .map_err(|e| e.into_operation("update"));
        }
    }

    async fn delete_batch(&self, _txn: &ReadTxn, batch: &mut [BatchEntry<O>]) {
        for entry in batch.iter_mut() {
            entry.result = self
                .remove(&entry.object)
                .map_err(|e| e.into_operation("delete"));
        }
    }
}
