use async_trait::async_trait;
use scylla::frame::response::result::CqlValue;
use scylla::host_filter::AllowListHostFilter;
use scylla::statement::batch::Batch;
use scylla::statement::query::Query;
use scylla::transport::session::PoolSize;
use scylla::{Session, SessionBuilder};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::client::{ClusterClient, Connector, RowColumns, ServerAddress};
use crate::errors::StoreError;
use crate::record::mutation::{Mutation, MutationBatch};
use crate::types::ConsistencyLevel;

/// Opens one scylla session per pooled connection, pinned to a single node.
///
/// Column families are CQL tables of the shape
/// `(key text, column1 text, value blob, PRIMARY KEY (key, column1))`.
#[derive(Debug, Clone)]
pub struct ScyllaConnector {
    connection_timeout: Duration,
}

impl Default for ScyllaConnector {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl ScyllaConnector {
    pub fn new(connection_timeout: Duration) -> Self {
        Self { connection_timeout }
    }
}

#[async_trait]
impl Connector for ScyllaConnector {
    async fn connect(
        &self,
        address: &ServerAddress,
        keyspace: &str,
        credentials: Option<(&str, &str)>,
    ) -> Result<Box<dyn ClusterClient>, StoreError> {
        let node = address.to_string();
        info!("Connecting to ScyllaDB node {} (keyspace: {})", node, keyspace);

        let host_filter = AllowListHostFilter::new([node.as_str()]).map_err(|e| {
            StoreError::ConfigError(format!("Cannot resolve node address {}: {}", node, e))
        })?;

        let mut session_builder = SessionBuilder::new()
            .known_node(&node)
            .host_filter(Arc::new(host_filter))
            .pool_size(PoolSize::PerHost(NonZeroUsize::MIN))
            .connection_timeout(self.connection_timeout)
            .use_keyspace(keyspace, false);

        // Add authentication if provided
        if let Some((username, password)) = credentials {
            session_builder = session_builder.user(username, password);
        }

        let session = session_builder.build().await.map_err(|e| {
            error!("Failed to connect to ScyllaDB node {}: {}", node, e);
            StoreError::NetworkError(format!("Connection to {} failed: {}", node, e))
        })?;

        Ok(Box::new(ScyllaClient { session, node }))
    }
}

pub struct ScyllaClient {
    session: Session,
    node: String,
}

#[async_trait]
impl ClusterClient for ScyllaClient {
    async fn batch_mutate(
        &self,
        mutations: &MutationBatch,
        consistency: ConsistencyLevel,
    ) -> Result<(), StoreError> {
        let statements = batch_statements(mutations);
        if statements.is_empty() {
            return Ok(());
        }

        let mut batch = Batch::default();
        let mut values = Vec::with_capacity(statements.len());
        for (statement, row) in statements {
            batch.append_statement(statement.as_str());
            values.push(row);
        }
        batch.set_consistency(consistency.into());

        debug!(
            "Submitting batch of {} statement(s) to {} at {}",
            values.len(),
            self.node,
            consistency
        );
        self.session
            .batch(&batch, values)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Batch execution failed: {}", e)))?;
        Ok(())
    }

    async fn get_row(
        &self,
        column_family: &str,
        key: &str,
        consistency: ConsistencyLevel,
    ) -> Result<Option<RowColumns>, StoreError> {
        let mut query = Query::new(format!(
            "SELECT column1, value FROM {} WHERE key = ?",
            column_family
        ));
        query.set_consistency(consistency.into());

        let result = self
            .session
            .query_unpaged(query, (key,))
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Row fetch failed: {}", e)))?;

        let rows = result
            .rows_typed::<(String, Vec<u8>)>()
            .map_err(|e| StoreError::DatabaseError(format!("Unexpected result: {}", e)))?;

        let mut columns = RowColumns::new();
        for row in rows {
            let (name, value) =
                row.map_err(|e| StoreError::DatabaseError(format!("Malformed row: {}", e)))?;
            columns.insert(name, value);
        }

        Ok((!columns.is_empty()).then_some(columns))
    }

    async fn remove_row(
        &self,
        column_family: &str,
        key: &str,
        timestamp: i64,
        consistency: ConsistencyLevel,
    ) -> Result<(), StoreError> {
        let mut query = Query::new(format!(
            "DELETE FROM {} USING TIMESTAMP ? WHERE key = ?",
            column_family
        ));
        query.set_consistency(consistency.into());

        self.session
            .query_unpaged(query, (timestamp, key))
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Row removal failed: {}", e)))?;
        Ok(())
    }

    async fn execute(&self, statement: &str) -> Result<(), StoreError> {
        self.session
            .query_unpaged(statement, ())
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Query execution failed: {}", e)))?;
        Ok(())
    }

    fn driver_name(&self) -> &str {
        "scylla"
    }
}

/// One CQL statement with bound values per mutation.
fn batch_statements(batch: &MutationBatch) -> Vec<(String, Vec<CqlValue>)> {
    batch
        .iter()
        .map(|(key, family, mutation)| match mutation {
            Mutation::Insert(column) => (
                format!(
                    "INSERT INTO {} (key, column1, value) VALUES (?, ?, ?) USING TIMESTAMP ?",
                    family
                ),
                vec![
                    CqlValue::Text(key.to_string()),
                    CqlValue::Text(column.name.clone()),
                    CqlValue::Blob(column.value.clone()),
                    CqlValue::BigInt(column.timestamp),
                ],
            ),
            Mutation::Delete(deletion) => (
                format!(
                    "DELETE FROM {} USING TIMESTAMP ? WHERE key = ? AND column1 IN ?",
                    family
                ),
                vec![
                    CqlValue::BigInt(deletion.timestamp),
                    CqlValue::Text(key.to_string()),
                    CqlValue::List(
                        deletion
                            .predicate
                            .iter()
                            .map(|name| CqlValue::Text(name.clone()))
                            .collect(),
                    ),
                ],
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::mutation::{Column, Deletion};

    #[test]
    fn test_batch_statements() {
        let mut batch = MutationBatch::new();
        batch.push(
            "u-1",
            "users",
            Mutation::Delete(Deletion {
                timestamp: 7,
                predicate: vec!["email".to_string(), "phone".to_string()],
            }),
        );
        batch.push(
            "u-1",
            "users",
            Mutation::Insert(Column {
                name: "name".to_string(),
                value: b"\"ada\"".to_vec(),
                timestamp: 7,
            }),
        );

        let statements = batch_statements(&batch);
        assert_eq!(statements.len(), 2);

        let (delete, delete_values) = &statements[0];
        assert!(delete.starts_with("DELETE FROM users USING TIMESTAMP ?"));
        assert_eq!(
            delete_values[2],
            CqlValue::List(vec![
                CqlValue::Text("email".to_string()),
                CqlValue::Text("phone".to_string()),
            ])
        );

        let (insert, insert_values) = &statements[1];
        assert!(insert.starts_with("INSERT INTO users (key, column1, value)"));
        assert_eq!(insert_values[0], CqlValue::Text("u-1".to_string()));
        assert_eq!(insert_values[3], CqlValue::BigInt(7));
    }

    #[test]
    fn test_empty_batch_has_no_statements() {
        assert!(batch_statements(&MutationBatch::new()).is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires running ScyllaDB instance
    async fn test_scylla_connection() {
        let client = ScyllaConnector::default()
            .connect(&ServerAddress::new("127.0.0.1", 9042), "system", None)
            .await;

        assert!(client.is_ok());
    }
}
