use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::StoreError;
use crate::record::mutation::MutationBatch;
use crate::types::ConsistencyLevel;

/// Raw columns of one row, keyed by column name.
pub type RowColumns = BTreeMap<String, Vec<u8>>;

/// A cluster node as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub const DEFAULT_PORT: u16 = 9042;

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for ServerAddress {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|e| {
                    StoreError::ConfigError(format!("Invalid port in address {}: {}", s, e))
                })?;
                (host, port)
            }
            None => (s, Self::DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(StoreError::ConfigError(format!("Missing host in address '{}'", s)));
        }
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Narrow handle to one open link with a cluster node, already bound to a keyspace.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Apply a keyed batch of column insertions and deletions.
    async fn batch_mutate(
        &self,
        batch: &MutationBatch,
        consistency: ConsistencyLevel,
    ) -> Result<(), StoreError>;

    /// Fetch every column of a row; `None` when the row has no live columns.
    async fn get_row(
        &self,
        column_family: &str,
        key: &str,
        consistency: ConsistencyLevel,
    ) -> Result<Option<RowColumns>, StoreError>;

    async fn remove_row(
        &self,
        column_family: &str,
        key: &str,
        timestamp: i64,
        consistency: ConsistencyLevel,
    ) -> Result<(), StoreError>;

    /// Run an ad-hoc statement, discarding any result rows.
    async fn execute(&self, statement: &str) -> Result<(), StoreError>;

    fn driver_name(&self) -> &str;
}

/// Opens transports to individual nodes.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        address: &ServerAddress,
        keyspace: &str,
        credentials: Option<(&str, &str)>,
    ) -> Result<Box<dyn ClusterClient>, StoreError>;
}
