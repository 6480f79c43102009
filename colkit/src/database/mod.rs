pub mod client;
pub mod memory;
pub mod retry;
pub mod scylla;

pub use client::{ClusterClient, Connector, RowColumns, ServerAddress};
pub use memory::{MemoryCluster, MemoryConnector};
pub use retry::RetryPolicy;
pub use self::scylla::{ScyllaClient, ScyllaConnector};
