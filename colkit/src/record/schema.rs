use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::StoreError;

/// Where records of one kind live in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub keyspace: String,
    pub column_family: String,
    /// Attribute holding the partition key
    pub key_attribute: String,
}

impl Schema {
    pub fn new(
        keyspace: impl Into<String>,
        column_family: impl Into<String>,
        key_attribute: impl Into<String>,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            column_family: column_family.into(),
            key_attribute: key_attribute.into(),
        }
    }
}

/// Maps a record kind to its [`Schema`].
pub trait SchemaResolver: Send + Sync {
    /// Fails with `ConfigError` when the kind was never registered.
    fn resolve(&self, kind: &str) -> Result<Schema, StoreError>;
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: impl Into<String>, schema: Schema) {
        let kind = kind.into();
        debug!(
            "Registered record kind {} -> {}.{} (key: {})",
            kind, schema.keyspace, schema.column_family, schema.key_attribute
        );
        self.schemas.insert(kind, schema);
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.schemas.contains_key(kind)
    }
}

impl SchemaResolver for SchemaRegistry {
    fn resolve(&self, kind: &str) -> Result<Schema, StoreError> {
        self.schemas
            .get(kind)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                StoreError::ConfigError(format!("record kind '{}' has no registered schema", kind))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_registered_kind() {
        let registry = SchemaRegistry::new();
        registry.register("user", Schema::new("app", "users", "id"));

        assert!(registry.is_registered("user"));
        assert_eq!(
            registry.resolve("user").unwrap(),
            Schema::new("app", "users", "id")
        );
    }

    #[test]
    fn test_unregistered_kind_is_config_error() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.resolve("ghost"),
            Err(StoreError::ConfigError(_))
        ));
    }
}
