use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::config::RetryConfig;
use crate::errors::StoreError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Run `operation`, retrying with exponential backoff while it fails with
    /// a retryable error.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.execute_when(StoreError::is_retryable, operation).await
    }

    /// Like [`execute`](Self::execute), but only errors accepted by
    /// `should_retry` are retried.
    pub async fn execute_when<P, F, Fut, T>(
        &self,
        should_retry: P,
        mut operation: F,
    ) -> Result<T, StoreError>
    where
        P: Fn(&StoreError) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        let mut delay = self.initial_delay;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) if !should_retry(&err) => return Err(err),
                Err(err) if attempt >= self.max_attempts - 1 => {
                    warn!("Operation failed after {} attempts: {}", self.max_attempts, err);
                    return Err(err);
                }
                Err(err) => {
                    warn!("Operation failed (attempt {}): {}, retrying...", attempt + 1, err);
                    sleep(delay).await;
                    delay = std::cmp::min(
                        self.max_delay,
                        Duration::from_secs_f64(delay.as_secs_f64() * self.exponential_base),
                    );
                    attempt += 1;
                }
            }
        }
    }
}
