use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Pool, PoolInner};
use crate::database::client::{ClusterClient, ServerAddress};
use crate::errors::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pooled,
    CheckedOut,
    Disposed,
}

/// One open link to one cluster node, lent out by a [`Pool`].
pub struct Connection {
    id: Uuid,
    address: ServerAddress,
    keyspace: String,
    state: ConnectionState,
    pool: Weak<PoolInner>,
    client: Option<Box<dyn ClusterClient>>,
}

impl Connection {
    /// Open a transport for `pool`. The caller owns the pool slot and must
    /// release it if this fails.
    pub(super) async fn open(
        pool: &Arc<PoolInner>,
        address: ServerAddress,
    ) -> Result<Self, StoreError> {
        let client = pool
            .connector
            .connect(&address, &pool.keyspace, pool.config.credentials())
            .await?;

        let connection = Self {
            id: Uuid::new_v4(),
            address,
            keyspace: pool.keyspace.clone(),
            state: ConnectionState::CheckedOut,
            pool: Arc::downgrade(pool),
            client: Some(client),
        };
        info!(
            "Opened connection {} to {} (keyspace: {})",
            connection.id, connection.address, connection.keyspace
        );
        Ok(connection)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.client.is_some()
    }

    /// The client handle, available only while checked out.
    pub fn client(&self) -> Result<&dyn ClusterClient, StoreError> {
        match (self.state, self.client.as_deref()) {
            (ConnectionState::CheckedOut, Some(client)) => Ok(client),
            _ => Err(StoreError::Disposed),
        }
    }

    /// Hand the connection back to its pool. Never fails: problems are logged
    /// and the connection is disposed instead.
    pub fn to_pool(mut self) {
        match self.pool.upgrade() {
            Some(inner) => {
                let id = self.id;
                if let Err(e) = Pool::from_inner(inner).put(self) {
                    warn!("Failed to return connection {} to pool: {}", id, e);
                }
            }
            None => {
                debug!("Pool for connection {} is gone, disposing", self.id);
                self.dispose();
            }
        }
    }

    /// Close the transport and free the pool slot. Idempotent.
    pub fn dispose(&mut self) {
        if let Some(client) = self.client.take() {
            drop(client);
            if let Some(pool) = self.pool.upgrade() {
                pool.release_slot(true);
            }
            debug!("Disposed connection {} to {}", self.id, self.address);
        }
        self.state = ConnectionState::Disposed;
    }

    pub(super) fn mark_pooled(&mut self) {
        self.state = ConnectionState::Pooled;
    }

    pub(super) fn mark_checked_out(&mut self) {
        self.state = ConnectionState::CheckedOut;
    }

    pub(super) fn belongs_to(&self, pool: &Arc<PoolInner>) -> bool {
        std::ptr::eq(self.pool.as_ptr(), Arc::as_ptr(pool))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("keyspace", &self.keyspace)
            .field("state", &self.state)
            .field("open", &self.is_open())
            .finish()
    }
}
