//! Dynamically scoped consistency level.
//!
//! The active level lives in a task-local slot. Entering a scope shadows the
//! enclosing level for the duration of a future or closure and the enclosing
//! level comes back on every exit path, including errors and panics. Scopes
//! opened by different tasks never observe each other.

use std::future::Future;

use crate::types::ConsistencyLevel;

tokio::task_local! {
    static ACTIVE_LEVEL: ConsistencyLevel;
}

#[derive(Debug, Clone, Copy)]
pub struct ConsistencyScope {
    level: ConsistencyLevel,
}

impl ConsistencyScope {
    pub fn new(level: ConsistencyLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> ConsistencyLevel {
        self.level
    }

    /// Run `future` with this scope's level active.
    pub async fn run<F: Future>(self, future: F) -> F::Output {
        ACTIVE_LEVEL.scope(self.level, future).await
    }

    /// Run `f` synchronously with this scope's level active.
    pub fn run_sync<R>(self, f: impl FnOnce() -> R) -> R {
        ACTIVE_LEVEL.sync_scope(self.level, f)
    }
}

/// The innermost active level, if any scope is open.
pub fn current_consistency() -> Option<ConsistencyLevel> {
    ACTIVE_LEVEL.try_with(|level| *level).ok()
}

pub fn effective_consistency(default: ConsistencyLevel) -> ConsistencyLevel {
    current_consistency().unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;

    #[test]
    fn test_no_scope_uses_default() {
        assert_eq!(current_consistency(), None);
        assert_eq!(
            effective_consistency(ConsistencyLevel::LocalOne),
            ConsistencyLevel::LocalOne
        );
    }

    #[test]
    fn test_nested_sync_scopes_restore() {
        ConsistencyScope::new(ConsistencyLevel::Quorum).run_sync(|| {
            assert_eq!(current_consistency(), Some(ConsistencyLevel::Quorum));

            ConsistencyScope::new(ConsistencyLevel::All).run_sync(|| {
                assert_eq!(current_consistency(), Some(ConsistencyLevel::All));
            });

            assert_eq!(current_consistency(), Some(ConsistencyLevel::Quorum));
        });
        assert_eq!(current_consistency(), None);
    }

    #[tokio::test]
    async fn test_scope_restored_after_error() {
        let outer = ConsistencyScope::new(ConsistencyLevel::One).run(async {
            let inner: Result<(), StoreError> = ConsistencyScope::new(ConsistencyLevel::All)
                .run(async { Err(StoreError::Disposed) })
                .await;
            assert!(inner.is_err());
            current_consistency()
        });

        assert_eq!(outer.await, Some(ConsistencyLevel::One));
        assert_eq!(current_consistency(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_scopes_are_isolated() {
        let mut handles = Vec::new();
        for level in [
            ConsistencyLevel::One,
            ConsistencyLevel::Quorum,
            ConsistencyLevel::All,
            ConsistencyLevel::LocalQuorum,
        ] {
            handles.push(tokio::spawn(ConsistencyScope::new(level).run(async move {
                for _ in 0..10 {
                    tokio::task::yield_now().await;
                    assert_eq!(current_consistency(), Some(level));
                }
                level
            })));
        }

        for handle in handles {
            handle.await.unwrap();
        }
    }
}
