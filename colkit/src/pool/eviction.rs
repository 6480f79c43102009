use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::PoolInner;
use crate::metrics;

/// Periodically trims a pool's idle connections down to a watermark, one
/// connection per sweep.
#[derive(Debug, Clone, Copy)]
pub struct EvictionProcess {
    max_idle: usize,
    delay: Duration,
}

/// Owner of a running [`EvictionProcess`].
pub struct EvictionHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EvictionProcess {
    pub fn new(max_idle: usize, delay: Duration) -> Self {
        Self { max_idle, delay }
    }

    pub(super) fn spawn(self, pool: Weak<PoolInner>) -> EvictionHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(pool, shutdown_rx));
        EvictionHandle { shutdown, task }
    }

    async fn run(self, pool: Weak<PoolInner>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Eviction started (max idle: {}, every {:?})",
            self.max_idle, self.delay
        );

        loop {
            tokio::select! {
                // A dropped sender means the pool is gone.
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.delay) => {
                    let Some(inner) = pool.upgrade() else {
                        break;
                    };
                    self.sweep(&inner);
                }
            }
        }

        debug!("Eviction stopped");
    }

    /// Dispose at most one idle connection above the watermark.
    pub(super) fn sweep(&self, pool: &PoolInner) -> bool {
        match pool.take_excess_idle(self.max_idle) {
            Some(mut connection) => {
                debug!(
                    "Evicting idle connection {} from keyspace {}",
                    connection.id(),
                    pool.keyspace
                );
                connection.dispose();
                metrics::record_pool_event(&pool.keyspace, "evicted");
                true
            }
            None => false,
        }
    }
}

impl EvictionHandle {
    /// Signal the task and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Eviction task ended abnormally: {}", e);
        }
    }
}
