use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Timeout error: no connection available after {0:?}")]
    TimedOut(Duration),

    #[error("Connection has been disposed")]
    Disposed,

    #[error("All servers unavailable: {0}")]
    AllServersUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl StoreError {
    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::TimedOut(_) | StoreError::AllServersUnavailable(_)
        )
    }
}

impl From<scylla::transport::errors::QueryError> for StoreError {
    fn from(err: scylla::transport::errors::QueryError) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

impl From<scylla::transport::errors::NewSessionError> for StoreError {
    fn from(err: scylla::transport::errors::NewSessionError) -> Self {
        StoreError::NetworkError(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::SerializationError(err.to_string())
    }
}

impl From<config::ConfigError> for StoreError {
    fn from(err: config::ConfigError) -> Self {
        StoreError::ConfigError(err.to_string())
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Unknown(err.to_string())
    }
}
