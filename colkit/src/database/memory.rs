//! In-process column store implementing the cluster client traits.
//!
//! Every connection opened through a [`MemoryConnector`] shares one
//! [`MemoryCluster`]. Writes follow last-writer-wins on column timestamps,
//! and deletions leave tombstones that shadow older inserts.
//! Nodes can be marked down to exercise failover, and every connect attempt
//! is recorded in order.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::client::{ClusterClient, Connector, RowColumns, ServerAddress};
use crate::errors::StoreError;
use crate::record::mutation::{Mutation, MutationBatch};
use crate::types::ConsistencyLevel;

/// A column cell; `None` is a tombstone.
#[derive(Debug, Clone)]
struct StoredColumn {
    value: Option<Vec<u8>>,
    timestamp: i64,
}

#[derive(Debug)]
struct Row {
    columns: BTreeMap<String, StoredColumn>,
    /// Timestamp of the latest whole-row deletion.
    deleted_at: i64,
}

impl Default for Row {
    fn default() -> Self {
        Self {
            columns: BTreeMap::new(),
            deleted_at: i64::MIN,
        }
    }
}

impl Row {
    /// Deletions win timestamp ties; inserts win ties against inserts.
    fn insert(&mut self, name: &str, value: &[u8], timestamp: i64) {
        if timestamp <= self.deleted_at {
            return;
        }
        let newer = match self.columns.get(name) {
            Some(StoredColumn { value: Some(_), timestamp: existing }) => *existing <= timestamp,
            Some(StoredColumn { value: None, timestamp: deleted }) => *deleted < timestamp,
            None => true,
        };
        if newer {
            self.columns.insert(
                name.to_string(),
                StoredColumn {
                    value: Some(value.to_vec()),
                    timestamp,
                },
            );
        }
    }

    fn delete(&mut self, name: &str, timestamp: i64) {
        let shadows = self
            .columns
            .get(name)
            .map_or(true, |existing| existing.timestamp <= timestamp);
        if shadows {
            self.columns.insert(
                name.to_string(),
                StoredColumn {
                    value: None,
                    timestamp,
                },
            );
        }
    }

    fn delete_all(&mut self, timestamp: i64) {
        let deleted_at = self.deleted_at.max(timestamp);
        self.deleted_at = deleted_at;
        self.columns.retain(|_, existing| existing.timestamp > deleted_at);
    }

    fn live_columns(&self) -> RowColumns {
        self.columns
            .iter()
            .filter_map(|(name, column)| Some((name.clone(), column.value.clone()?)))
            .collect()
    }
}

#[derive(Default)]
struct ClusterState {
    /// (keyspace, column family) -> key -> row
    tables: Mutex<HashMap<(String, String), BTreeMap<String, Row>>>,
    down: Mutex<HashSet<ServerAddress>>,
    connect_log: Mutex<Vec<ServerAddress>>,
    consistency_log: Mutex<Vec<ConsistencyLevel>>,
    fail_writes: AtomicBool,
    open: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryCluster {
    state: Arc<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            cluster: self.clone(),
        }
    }

    pub fn mark_down(&self, address: &ServerAddress) {
        self.state.down.lock().insert(address.clone());
    }

    pub fn mark_up(&self, address: &ServerAddress) {
        self.state.down.lock().remove(address);
    }

    /// Make every subsequent write fail until switched off again.
    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Addresses of every connect attempt, including failed ones.
    pub fn connect_log(&self) -> Vec<ServerAddress> {
        self.state.connect_log.lock().clone()
    }

    /// Consistency level of every successful write, in order.
    pub fn consistency_log(&self) -> Vec<ConsistencyLevel> {
        self.state.consistency_log.lock().clone()
    }

    pub fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    pub fn row(&self, keyspace: &str, column_family: &str, key: &str) -> Option<RowColumns> {
        let tables = self.state.tables.lock();
        let row = tables
            .get(&(keyspace.to_string(), column_family.to_string()))?
            .get(key)?;
        let columns = row.live_columns();
        if columns.is_empty() {
            return None;
        }
        Some(columns)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::DatabaseError("write rejected by cluster".to_string()));
        }
        Ok(())
    }
}

pub struct MemoryConnector {
    cluster: MemoryCluster,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        address: &ServerAddress,
        keyspace: &str,
        _credentials: Option<(&str, &str)>,
    ) -> Result<Box<dyn ClusterClient>, StoreError> {
        let state = &self.cluster.state;
        state.connect_log.lock().push(address.clone());

        if state.down.lock().contains(address) {
            return Err(StoreError::NetworkError(format!(
                "connection refused by {}",
                address
            )));
        }

        state.open.fetch_add(1, Ordering::SeqCst);
        debug!("Memory connection opened to {} ({})", address, keyspace);
        Ok(Box::new(MemoryClient {
            cluster: self.cluster.clone(),
            keyspace: keyspace.to_string(),
        }))
    }
}

struct MemoryClient {
    cluster: MemoryCluster,
    keyspace: String,
}

impl MemoryClient {
    fn table_key(&self, column_family: &str) -> (String, String) {
        (self.keyspace.clone(), column_family.to_string())
    }
}

#[async_trait]
impl ClusterClient for MemoryClient {
    async fn batch_mutate(
        &self,
        batch: &MutationBatch,
        consistency: ConsistencyLevel,
    ) -> Result<(), StoreError> {
        self.cluster.check_writable()?;

        let mut tables = self.cluster.state.tables.lock();
        for (key, family, mutation) in batch.iter() {
            let row = tables
                .entry(self.table_key(family))
                .or_default()
                .entry(key.to_string())
                .or_default();

            match mutation {
                Mutation::Insert(column) => {
                    row.insert(&column.name, &column.value, column.timestamp)
                }
                Mutation::Delete(deletion) => {
                    for name in &deletion.predicate {
                        row.delete(name, deletion.timestamp);
                    }
                }
            }
        }
        drop(tables);

        self.cluster.state.consistency_log.lock().push(consistency);
        Ok(())
    }

    async fn get_row(
        &self,
        column_family: &str,
        key: &str,
        _consistency: ConsistencyLevel,
    ) -> Result<Option<RowColumns>, StoreError> {
        Ok(self.cluster.row(&self.keyspace, column_family, key))
    }

    async fn remove_row(
        &self,
        column_family: &str,
        key: &str,
        timestamp: i64,
        consistency: ConsistencyLevel,
    ) -> Result<(), StoreError> {
        self.cluster.check_writable()?;

        let mut tables = self.cluster.state.tables.lock();
        tables
            .entry(self.table_key(column_family))
            .or_default()
            .entry(key.to_string())
            .or_default()
            .delete_all(timestamp);
        drop(tables);

        self.cluster.state.consistency_log.lock().push(consistency);
        Ok(())
    }

    async fn execute(&self, statement: &str) -> Result<(), StoreError> {
        debug!("Ignoring statement on memory cluster: {}", statement);
        Ok(())
    }

    fn driver_name(&self) -> &str {
        "memory"
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        self.cluster.state.open.fetch_sub(1, Ordering::SeqCst);
    }
}
