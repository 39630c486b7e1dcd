//! Handing accepted jobs to background execution.

use staging_core::JobId;
use thiserror::Error;

/// Error type for dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Executor pool unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to start executor pool: {0}")]
    Spawn(String),

    #[error("Executor pool did not answer in time")]
    Timeout,
}

/// Schedules a pending job for execution without waiting for it.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, job_id: JobId) -> Result<(), DispatchError>;
}
