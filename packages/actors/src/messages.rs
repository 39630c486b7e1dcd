//! Message types for actor communication.

use ractor::RpcReplyPort;
use serde::{Deserialize, Serialize};
use staging_core::JobId;

use crate::executor::ExecutionOutcome;

/// Messages for the PoolActor.
#[derive(Debug)]
pub enum PoolMessage {
    /// Run a job on the next free worker, queueing it if none is free.
    Dispatch { job_id: JobId },

    /// A worker finished a job and is free again.
    JobFinished {
        worker_id: String,
        job_id: JobId,
        outcome: ExecutionOutcome,
    },

    /// Get pool stats.
    GetStats { reply: RpcReplyPort<PoolStats> },

    /// Stop all workers once their current job is done.
    Shutdown,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run the executor for one job.
    Execute { job_id: JobId },

    /// Shutdown the worker.
    Shutdown,
}

/// Point-in-time view of the executor pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub workers: usize,
    pub busy: usize,
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}
