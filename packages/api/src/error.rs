//! Errors surfaced by the staging service.

use actors::DispatchError;
use db::DbError;
use staging_core::{ConfigError, RateLimitError, ValidationError};
use storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Registry error: {0}")]
    Registry(DbError),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl StagingError {
    /// Errors caused by the request rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StagingError::Validation(_)
                | StagingError::RateLimit(_)
                | StagingError::NotFound(_)
                | StagingError::InvalidId(_)
        )
    }
}

impl From<DbError> for StagingError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => StagingError::NotFound(what),
            other => StagingError::Registry(other),
        }
    }
}

impl From<StorageError> for StagingError {
    fn from(err: StorageError) -> Self {
        if err.is_not_found() {
            StagingError::NotFound(err.to_string())
        } else {
            StagingError::Storage(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, StagingError>;
