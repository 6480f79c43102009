//! Per-keyspace connection pooling.
//!
//! A [`Pool`] lends out [`Connection`]s to one keyspace, opening new ones on
//! demand up to `pool_size` and rotating through the configured servers in a
//! fixed order. The idle queue and the live-connection counter share one
//! lock so the pool can never overshoot its size; the rotation cursor is an
//! independent atomic. Callers that find the pool exhausted wait on a
//! [`Notify`] until a connection is returned, a slot frees up, or the timeout
//! elapses.

pub mod connection;
pub mod eviction;
pub mod manager;

pub use connection::{Connection, ConnectionState};
pub use eviction::{EvictionHandle, EvictionProcess};
pub use manager::PoolManager;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::database::client::{Connector, ServerAddress};
use crate::errors::StoreError;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Idle plus checked-out connections
    pub live: usize,
    pub idle: usize,
    pub max: usize,
}

struct PoolState {
    idle: VecDeque<Connection>,
    live: usize,
    closed: bool,
}

pub(crate) struct PoolInner {
    keyspace: String,
    config: PoolConfig,
    addresses: Vec<ServerAddress>,
    cursor: AtomicUsize,
    connector: Arc<dyn Connector>,
    state: Mutex<PoolState>,
    available: Notify,
    eviction: Mutex<Option<EvictionHandle>>,
}

enum Checkout<'a> {
    Idle(Connection),
    Reserved(SlotReservation<'a>),
    Exhausted,
}

/// A live slot counted before its connection exists. Dropping the
/// reservation gives the slot back, so an open that fails or is cancelled
/// mid-await cannot leak quota.
struct SlotReservation<'a> {
    pool: &'a PoolInner,
    armed: bool,
}

impl SlotReservation<'_> {
    /// The slot now belongs to an open connection.
    fn fulfil(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot(false);
        }
    }
}

#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new(
        keyspace: impl Into<String>,
        config: PoolConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let addresses = config
            .servers
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<ServerAddress>, _>>()?;
        let keyspace = keyspace.into();

        info!(
            "Created pool for keyspace {} (size: {}, servers: {:?})",
            keyspace, config.pool_size, config.servers
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(config.pool_size),
                    live: 0,
                    closed: false,
                }),
                keyspace,
                config,
                addresses,
                cursor: AtomicUsize::new(0),
                connector,
                available: Notify::new(),
                eviction: Mutex::new(None),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<PoolInner>) -> Self {
        Self { inner }
    }

    pub fn keyspace(&self) -> &str {
        &self.inner.keyspace
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            live: state.live,
            idle: state.idle.len(),
            max: self.inner.config.pool_size,
        }
    }

    /// Check out a connection, opening one on the next server if there is
    /// room, otherwise waiting up to the configured timeout.
    pub async fn get(&self) -> Result<Connection, StoreError> {
        self.acquire(false).await
    }

    /// Like [`Pool::get`], but a failed open moves on to the next server
    /// instead of returning the error. Fails with `AllServersUnavailable`
    /// once every attempt has failed.
    pub async fn get_with_failover(&self) -> Result<Connection, StoreError> {
        self.acquire(true).await
    }

    async fn acquire(&self, failover: bool) -> Result<Connection, StoreError> {
        let timeout = self.inner.config.timeout();
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before looking at the state so a put between
            // the check and the wait is not missed.
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.inner.checkout()? {
                Checkout::Idle(connection) => return Ok(connection),
                Checkout::Reserved(reservation) => {
                    return self.open_reserved(reservation, failover).await
                }
                Checkout::Exhausted => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(
                    "Pool for keyspace {} exhausted, no connection after {:?}",
                    self.inner.keyspace, timeout
                );
                metrics::record_pool_event(&self.inner.keyspace, "timed_out");
                return Err(StoreError::TimedOut(timeout));
            }
        }
    }

    /// Open a connection into a slot already counted as live.
    async fn open_reserved(
        &self,
        reservation: SlotReservation<'_>,
        failover: bool,
    ) -> Result<Connection, StoreError> {
        let attempts = if failover {
            self.inner
                .addresses
                .len()
                .min(self.inner.config.max_retries.saturating_add(1))
        } else {
            1
        };

        let mut last_error = None;
        for attempt in 1..=attempts {
            let address = self.inner.next_address();
            match Connection::open(&self.inner, address.clone()).await {
                Ok(connection) => {
                    reservation.fulfil();
                    metrics::record_pool_event(&self.inner.keyspace, "created");
                    return Ok(connection);
                }
                Err(e) => {
                    warn!(
                        "Failed to open connection to {} (attempt {}/{}): {}",
                        address, attempt, attempts, e
                    );
                    last_error = Some(e);
                }
            }
        }

        drop(reservation);

        let error = last_error.unwrap_or_else(|| StoreError::Unknown("no attempt made".into()));
        if failover {
            Err(StoreError::AllServersUnavailable(format!(
                "{} attempt(s) for keyspace {} failed, last error: {}",
                attempts, self.inner.keyspace, error
            )))
        } else {
            Err(error)
        }
    }

    /// Return a checked-out connection. A full or closed pool disposes it
    /// instead.
    pub fn put(&self, mut connection: Connection) -> Result<(), StoreError> {
        match connection.state() {
            ConnectionState::CheckedOut => {}
            ConnectionState::Disposed => return Err(StoreError::Disposed),
            ConnectionState::Pooled => {
                warn!("Connection {} is already pooled", connection.id());
                return Ok(());
            }
        }
        if !connection.belongs_to(&self.inner) {
            connection.dispose();
            return Err(StoreError::ConfigError(format!(
                "connection {} does not belong to the pool for keyspace {}",
                connection.id(),
                self.inner.keyspace
            )));
        }

        let overflow = {
            let mut state = self.inner.state.lock();
            if state.closed || state.idle.len() >= self.inner.config.pool_size {
                Some(connection)
            } else {
                connection.mark_pooled();
                state.idle.push_back(connection);
                metrics::set_pool_connections(&self.inner.keyspace, state.live, state.idle.len());
                None
            }
        };

        match overflow {
            Some(mut connection) => {
                debug!(
                    "Pool for keyspace {} is full or closed, disposing connection {}",
                    self.inner.keyspace,
                    connection.id()
                );
                connection.dispose();
            }
            None => self.inner.available.notify_one(),
        }
        Ok(())
    }

    /// Start the background eviction task. Does nothing if it is already
    /// running or if eviction is disabled by a zero delay.
    pub fn start_eviction(&self) {
        let delay = self.inner.config.eviction_delay();
        if delay.is_zero() {
            debug!("Eviction disabled for keyspace {}", self.inner.keyspace);
            return;
        }

        let mut slot = self.inner.eviction.lock();
        if slot.is_none() {
            let process = EvictionProcess::new(self.inner.config.max_idle, delay);
            *slot = Some(process.spawn(Arc::downgrade(&self.inner)));
        }
    }

    pub fn is_evicting(&self) -> bool {
        self.inner.eviction.lock().is_some()
    }

    /// Stop eviction and close every idle connection. Connections still
    /// checked out are disposed when they come back.
    pub async fn dispose_all(&self) {
        let handle = self.inner.eviction.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }

        let drained: Vec<Connection> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.idle.drain(..).collect()
        };

        let count = drained.len();
        for mut connection in drained {
            connection.dispose();
        }
        self.inner.available.notify_waiters();

        info!(
            "Disposed {} idle connection(s) for keyspace {}",
            count, self.inner.keyspace
        );
    }
}

impl PoolInner {
    fn next_address(&self) -> ServerAddress {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.addresses.len();
        self.addresses[index].clone()
    }

    fn checkout(&self) -> Result<Checkout<'_>, StoreError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(StoreError::Disposed);
        }

        // Most recently returned first; eviction trims from the other end.
        if let Some(mut connection) = state.idle.pop_back() {
            connection.mark_checked_out();
            metrics::set_pool_connections(&self.keyspace, state.live, state.idle.len());
            return Ok(Checkout::Idle(connection));
        }

        if state.live < self.config.pool_size {
            state.live += 1;
            metrics::set_pool_connections(&self.keyspace, state.live, state.idle.len());
            return Ok(Checkout::Reserved(SlotReservation {
                pool: self,
                armed: true,
            }));
        }

        Ok(Checkout::Exhausted)
    }

    /// Give back one live slot and wake a waiter.
    fn release_slot(&self, disposed: bool) {
        {
            let mut state = self.state.lock();
            state.live = state.live.saturating_sub(1);
            metrics::set_pool_connections(&self.keyspace, state.live, state.idle.len());
        }
        if disposed {
            metrics::record_pool_event(&self.keyspace, "disposed");
        }
        self.available.notify_one();
    }

    /// Remove the oldest idle connection if more than `max_idle` are idle.
    fn take_excess_idle(&self, max_idle: usize) -> Option<Connection> {
        let mut state = self.state.lock();
        if state.idle.len() > max_idle {
            state.idle.pop_front()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::client::ClusterClient;
    use crate::database::memory::MemoryCluster;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Never finishes connecting.
    struct StalledConnector;

    #[async_trait]
    impl Connector for StalledConnector {
        async fn connect(
            &self,
            _address: &ServerAddress,
            _keyspace: &str,
            _credentials: Option<(&str, &str)>,
        ) -> Result<Box<dyn ClusterClient>, StoreError> {
            std::future::pending().await
        }
    }

    fn config(servers: &[&str], pool_size: usize) -> PoolConfig {
        PoolConfig {
            servers: servers.iter().map(|s| s.to_string()).collect(),
            pool_size,
            timeout_ms: 100,
            max_idle: 1,
            eviction_delay_ms: 0,
            max_retries: 5,
            ..PoolConfig::default()
        }
    }

    fn pool(cluster: &MemoryCluster, servers: &[&str], pool_size: usize) -> Pool {
        Pool::new("app", config(servers, pool_size), Arc::new(cluster.connector())).unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get_reuses_connection() {
        let cluster = MemoryCluster::new();
        let pool = pool(&cluster, &["node1:9042"], 2);

        let connection = pool.get().await.unwrap();
        let id = connection.id();
        pool.put(connection).unwrap();
        assert_eq!(pool.status(), PoolStatus { live: 1, idle: 1, max: 2 });

        let again = pool.get().await.unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(again.state(), ConnectionState::CheckedOut);
        assert_eq!(cluster.connect_log().len(), 1);
    }

    #[tokio::test]
    async fn test_round_robin_visits_each_address_equally() {
        let cluster = MemoryCluster::new();
        let servers = ["node1:9042", "node2:9042", "node3:9042"];
        let pool = pool(&cluster, &servers, 6);

        let mut held = Vec::new();
        for _ in 0..6 {
            held.push(pool.get().await.unwrap());
        }

        let log = cluster.connect_log();
        assert_eq!(log.len(), 6);
        for server in servers {
            let address: ServerAddress = server.parse().unwrap();
            assert_eq!(log.iter().filter(|a| **a == address).count(), 2);
        }
        assert_eq!(log[0], log[3]);
        assert_eq!(log[1], log[4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_times_out() {
        let cluster = MemoryCluster::new();
        let pool = pool(&cluster, &["node1:9042"], 1);

        let _held = pool.get().await.unwrap();
        let started = Instant::now();
        let result = pool.get().await;

        assert!(matches!(result, Err(StoreError::TimedOut(_))));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(pool.status().live, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_served_by_put() {
        let cluster = MemoryCluster::new();
        let pool = pool(&cluster, &["node1:9042"], 1);

        let held = pool.get().await.unwrap();
        let id = held.id();
        let returner = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            returner.put(held).unwrap();
        });

        let connection = pool.get().await.unwrap();
        assert_eq!(connection.id(), id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_gets_never_exceed_pool_size() {
        let cluster = MemoryCluster::new();
        let mut config = config(&["node1:9042", "node2:9042"], 3);
        config.timeout_ms = 2_000;
        let pool = Pool::new("app", config, Arc::new(cluster.connector())).unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            let cluster = cluster.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let connection = pool.get().await.unwrap();
                    assert!(pool.status().live <= 3);
                    assert!(cluster.open_connections() <= 3);
                    tokio::task::yield_now().await;
                    connection.to_pool();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(pool.status().live <= 3);
        assert!(cluster.connect_log().len() <= 3);
    }

    #[tokio::test]
    async fn test_failed_open_releases_slot() {
        let cluster = MemoryCluster::new();
        cluster.mark_down(&"node1:9042".parse().unwrap());
        let pool = pool(&cluster, &["node1:9042", "node2:9042"], 1);

        let result = pool.get().await;
        assert!(matches!(result, Err(StoreError::NetworkError(_))));
        assert_eq!(pool.status().live, 0);

        // The cursor moved on, so the next attempt lands on node2.
        let connection = pool.get().await.unwrap();
        assert_eq!(connection.address().host, "node2");
    }

    #[tokio::test]
    async fn test_failover_skips_dead_server() {
        let cluster = MemoryCluster::new();
        cluster.mark_down(&"node1:9042".parse().unwrap());
        let pool = pool(&cluster, &["node1:9042", "node2:9042"], 2);

        let connection = pool.get_with_failover().await.unwrap();
        assert_eq!(connection.address().host, "node2");
        assert_eq!(pool.status().live, 1);
    }

    #[tokio::test]
    async fn test_failover_all_servers_down() {
        let cluster = MemoryCluster::new();
        for server in ["node1:9042", "node2:9042"] {
            cluster.mark_down(&server.parse().unwrap());
        }
        let pool = pool(&cluster, &["node1:9042", "node2:9042"], 2);

        let result = pool.get_with_failover().await;
        assert!(matches!(result, Err(StoreError::AllServersUnavailable(_))));
        assert_eq!(pool.status().live, 0);
        assert_eq!(cluster.connect_log().len(), 2);
    }

    #[tokio::test]
    async fn test_client_after_dispose_fails() {
        let cluster = MemoryCluster::new();
        let pool = pool(&cluster, &["node1:9042"], 1);

        let mut connection = pool.get().await.unwrap();
        assert!(connection.client().is_ok());

        connection.dispose();
        assert!(matches!(connection.client(), Err(StoreError::Disposed)));
        assert_eq!(connection.state(), ConnectionState::Disposed);
        assert_eq!(pool.status().live, 0);

        connection.dispose();
        assert_eq!(pool.status().live, 0);
        assert!(matches!(pool.put(connection), Err(StoreError::Disposed)));
    }

    #[tokio::test]
    async fn test_dropped_connection_frees_slot() {
        let cluster = MemoryCluster::new();
        let pool = pool(&cluster, &["node1:9042"], 1);

        drop(pool.get().await.unwrap());
        assert_eq!(pool.status().live, 0);
        assert_eq!(cluster.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_dispose_all_closes_idle_and_late_returns() {
        let cluster = MemoryCluster::new();
        let pool = pool(&cluster, &["node1:9042"], 3);

        let idle = pool.get().await.unwrap();
        let busy = pool.get().await.unwrap();
        pool.put(idle).unwrap();

        pool.dispose_all().await;
        assert_eq!(pool.status(), PoolStatus { live: 1, idle: 0, max: 3 });

        busy.to_pool();
        assert_eq!(pool.status().live, 0);
        assert_eq!(cluster.open_connections(), 0);
        assert!(matches!(pool.get().await, Err(StoreError::Disposed)));
    }

    #[tokio::test]
    async fn test_put_rejects_foreign_connection() {
        let cluster = MemoryCluster::new();
        let first = pool(&cluster, &["node1:9042"], 1);
        let second = pool(&cluster, &["node1:9042"], 1);

        let connection = first.get().await.unwrap();
        assert!(matches!(second.put(connection), Err(StoreError::ConfigError(_))));
        assert_eq!(first.status().live, 0);
        assert_eq!(second.status().idle, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_open_releases_slot() {
        let pool = Pool::new(
            "app",
            config(&["node1:9042"], 1),
            Arc::new(StalledConnector),
        )
        .unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(50), pool.get()).await;
        assert!(cancelled.is_err());
        assert_eq!(pool.status().live, 0);

        // The freed slot can be reserved again rather than reported exhausted.
        assert!(matches!(pool.inner.checkout(), Ok(Checkout::Reserved(_))));
        assert_eq!(pool.status().live, 0);
    }
}
