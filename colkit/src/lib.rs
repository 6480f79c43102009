//! Pooled, change-tracked data access for Scylla/Cassandra column families.
//!
//! Records are open-ended attribute maps. Saving a [`Record`] sends only the
//! attributes added, modified or deleted since its last commit, as one
//! mutation batch over a connection borrowed from the keyspace's [`Pool`].

pub mod config;
pub mod consistency;
pub mod database;
pub mod errors;
pub mod metrics;
pub mod pool;
pub mod record;
pub mod types;

pub use config::{load_config, PoolConfig, RetryConfig, StoreConfig};
pub use consistency::{current_consistency, effective_consistency, ConsistencyScope};
pub use database::{ClusterClient, Connector, MemoryCluster, ScyllaConnector, ServerAddress};
pub use errors::StoreError;
pub use pool::{Connection, ConnectionState, Pool, PoolManager, PoolStatus};
pub use record::{Differ, MutationBatch, MutationBuilder, Record, RecordStore, Schema, SchemaRegistry};
pub use types::{Attributes, ColumnValue, ConsistencyLevel};
