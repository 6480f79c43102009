use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use super::Pool;
use crate::config::PoolConfig;
use crate::database::client::Connector;
use crate::errors::StoreError;

/// Lazily creates one [`Pool`] per keyspace, all sharing a configuration and
/// connector.
pub struct PoolManager {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    pools: DashMap<String, Pool>,
}

impl PoolManager {
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector>) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            pools: DashMap::new(),
        })
    }

    /// The pool for `keyspace`, created with eviction running on first use.
    pub fn pool(&self, keyspace: &str) -> Result<Pool, StoreError> {
        if let Some(pool) = self.pools.get(keyspace) {
            return Ok(pool.value().clone());
        }

        let entry = self
            .pools
            .entry(keyspace.to_string())
            .or_try_insert_with(|| {
                let pool = Pool::new(keyspace, self.config.clone(), self.connector.clone())?;
                pool.start_eviction();
                Ok::<_, StoreError>(pool)
            })?;
        Ok(entry.value().clone())
    }

    pub fn keyspaces(&self) -> Vec<String> {
        self.pools.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Tear down every pool. Pools handed out earlier refuse further checkouts.
    pub async fn dispose_all(&self) {
        let pools: Vec<Pool> = self.pools.iter().map(|entry| entry.value().clone()).collect();
        self.pools.clear();

        for pool in &pools {
            pool.dispose_all().await;
        }
        info!("Disposed {} pool(s)", pools.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryCluster;

    fn manager(cluster: &MemoryCluster) -> PoolManager {
        let config = PoolConfig {
            servers: vec!["node1:9042".to_string()],
            ..PoolConfig::default()
        };
        PoolManager::new(config, Arc::new(cluster.connector())).unwrap()
    }

    #[tokio::test]
    async fn test_one_pool_per_keyspace() {
        let cluster = MemoryCluster::new();
        let manager = manager(&cluster);

        let first = manager.pool("app").unwrap();
        let again = manager.pool("app").unwrap();
        let other = manager.pool("audit").unwrap();

        let connection = first.get().await.unwrap();
        again.put(connection).unwrap();
        assert_eq!(first.status().idle, 1);
        assert_eq!(other.status().idle, 0);
        assert!(first.is_evicting());

        let mut keyspaces = manager.keyspaces();
        keyspaces.sort();
        assert_eq!(keyspaces, vec!["app", "audit"]);
    }

    #[tokio::test]
    async fn test_dispose_all_tears_down_pools() {
        let cluster = MemoryCluster::new();
        let manager = manager(&cluster);

        let pool = manager.pool("app").unwrap();
        let connection = pool.get().await.unwrap();
        pool.put(connection).unwrap();

        manager.dispose_all().await;
        assert!(manager.keyspaces().is_empty());
        assert!(!pool.is_evicting());
        assert_eq!(cluster.open_connections(), 0);
        assert!(matches!(pool.get().await, Err(StoreError::Disposed)));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let cluster = MemoryCluster::new();
        let config = PoolConfig {
            pool_size: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(
            PoolManager::new(config, Arc::new(cluster.connector())),
            Err(StoreError::ConfigError(_))
        ));
    }
}
