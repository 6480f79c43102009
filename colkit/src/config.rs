use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::StoreError;
use crate::types::ConsistencyLevel;

/// Settings shared by every per-keyspace pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Candidate nodes as `host` or `host:port`, visited round robin
    pub servers: Vec<String>,
    pub pool_size: usize,
    pub timeout_ms: u64,
    /// Idle watermark enforced by the eviction process
    pub max_idle: usize,
    pub eviction_delay_ms: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Extra addresses tried when a new connection cannot be opened
    pub max_retries: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            servers: vec!["localhost:9042".to_string()],
            pool_size: 5,
            timeout_ms: 500,
            max_idle: 2,
            eviction_delay_ms: 10_000,
            username: None,
            password: None,
            max_retries: 5,
        }
    }
}

impl PoolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn eviction_delay(&self) -> Duration {
        Duration::from_millis(self.eviction_delay_ms)
    }

    /// Credentials are only used when both halves are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.servers.is_empty() {
            return Err(StoreError::ConfigError("at least one server is required".to_string()));
        }
        if self.pool_size == 0 {
            return Err(StoreError::ConfigError("pool_size must be greater than zero".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub pool: PoolConfig,
    /// Used when no consistency scope is active
    pub default_consistency: ConsistencyLevel,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

/// Load a `StoreConfig` from a file, with `COLKIT_*` environment overrides.
pub fn load_config(path: &str) -> Result<StoreConfig, StoreError> {
    let config = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::with_prefix("COLKIT").separator("__"))
        .build()?;

    let store_config: StoreConfig = config.try_deserialize()?;
    store_config.pool.validate()?;
    Ok(store_config)
}
