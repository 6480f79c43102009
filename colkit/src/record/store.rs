use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::mutation::{now_micros, partition_key, MutationBuilder};
use super::schema::{Schema, SchemaResolver};
use super::Record;
use crate::config::StoreConfig;
use crate::consistency::effective_consistency;
use crate::database::client::Connector;
use crate::database::retry::RetryPolicy;
use crate::errors::StoreError;
use crate::metrics;
use crate::pool::{Connection, PoolManager};
use crate::types::{Attributes, ColumnValue, ConsistencyLevel};

/// Persists records through pooled connections, writing only what changed.
pub struct RecordStore {
    pools: PoolManager,
    schemas: Arc<dyn SchemaResolver>,
    default_consistency: ConsistencyLevel,
    retry: RetryPolicy,
}

impl RecordStore {
    pub fn new(
        config: &StoreConfig,
        connector: Arc<dyn Connector>,
        schemas: Arc<dyn SchemaResolver>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            pools: PoolManager::new(config.pool.clone(), connector)?,
            schemas,
            default_consistency: config.default_consistency,
            retry: RetryPolicy::from(&config.retry),
        })
    }

    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    /// Level for the next request: the innermost consistency scope, or the
    /// configured default.
    pub fn consistency(&self) -> ConsistencyLevel {
        effective_consistency(self.default_consistency)
    }

    /// Write the record's pending changes and commit it. Returns the number
    /// of mutations sent. On failure the record keeps its pending changes.
    pub async fn save(&self, record: &mut Record) -> Result<usize, StoreError> {
        let start = Instant::now();
        let schema = self.schemas.resolve(record.kind())?;

        let result = self.submit_changes(record, &schema).await;
        metrics::record_operation(
            "save",
            &schema.keyspace,
            result.is_ok(),
            start.elapsed().as_secs_f64(),
        );

        let sent = result?;
        record.commit();
        Ok(sent)
    }

    async fn submit_changes(&self, record: &Record, schema: &Schema) -> Result<usize, StoreError> {
        let batch = MutationBuilder::new(record, schema).build()?;
        if batch.is_empty() {
            debug!("No changes to save for {} record", record.kind());
            return Ok(0);
        }

        let consistency = self.consistency();
        let connection = self.checkout(&schema.keyspace).await?;
        let result = match connection.client() {
            Ok(client) => client.batch_mutate(&batch, consistency).await,
            Err(e) => Err(e),
        };
        release(connection, &result);
        result?;

        debug!(
            "Saved {} mutation(s) to {}.{} at {}",
            batch.len(),
            schema.keyspace,
            schema.column_family,
            consistency
        );
        Ok(batch.len())
    }

    /// Fetch a record by partition key; `None` when the row does not exist.
    pub async fn load(&self, kind: &str, key: &str) -> Result<Option<Record>, StoreError> {
        let start = Instant::now();
        let schema = self.schemas.resolve(kind)?;
        let consistency = self.consistency();

        let connection = self.checkout(&schema.keyspace).await?;
        let result = match connection.client() {
            Ok(client) => client.get_row(&schema.column_family, key, consistency).await,
            Err(e) => Err(e),
        };
        release(connection, &result);
        metrics::record_operation(
            "load",
            &schema.keyspace,
            result.is_ok(),
            start.elapsed().as_secs_f64(),
        );

        let Some(columns) = result? else {
            return Ok(None);
        };

        let mut attributes = Attributes::new();
        for (name, bytes) in columns {
            attributes.insert(name, ColumnValue::from_bytes(&bytes)?);
        }
        attributes
            .entry(schema.key_attribute.clone())
            .or_insert_with(|| ColumnValue::from(key));
        Ok(Some(Record::committed(kind, attributes)))
    }

    /// Delete the record's whole row.
    pub async fn remove(&self, record: &Record) -> Result<(), StoreError> {
        let start = Instant::now();
        let schema = self.schemas.resolve(record.kind())?;
        let key = partition_key(record, &schema)?;
        let consistency = self.consistency();

        let connection = self.checkout(&schema.keyspace).await?;
        let result = match connection.client() {
            Ok(client) => {
                client
                    .remove_row(&schema.column_family, &key, now_micros(), consistency)
                    .await
            }
            Err(e) => Err(e),
        };
        release(connection, &result);
        metrics::record_operation(
            "remove",
            &schema.keyspace,
            result.is_ok(),
            start.elapsed().as_secs_f64(),
        );
        result
    }

    /// Only a full failover miss is retried. A pool timeout is returned as
    /// is, so waiting for a free connection stays bounded by `timeout_ms`.
    async fn checkout(&self, keyspace: &str) -> Result<Connection, StoreError> {
        let pool = self.pools.pool(keyspace)?;
        self.retry
            .execute_when(
                |e| matches!(e, StoreError::AllServersUnavailable(_)),
                || pool.get_with_failover(),
            )
            .await
    }

    pub async fn shutdown(&self) {
        info!("Shutting down record store");
        self.pools.dispose_all().await;
    }
}

/// Healthy connections go back to the pool; a failed request may have left
/// the transport in an unknown state, so it is discarded.
fn release<T>(mut connection: Connection, result: &Result<T, StoreError>) {
    match result {
        Ok(_) => connection.to_pool(),
        Err(e) => {
            warn!("Discarding connection {} after error: {}", connection.id(), e);
            connection.dispose();
        }
    }
}
