//! Worker actor for executing jobs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::executor::{ExecutionOutcome, Executor};
use crate::messages::{PoolMessage, WorkerMessage};

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: String,
    /// Pool actor reference.
    pub pool: ActorRef<PoolMessage>,
    /// Shared executor.
    pub executor: Arc<Executor>,
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub pool: ActorRef<PoolMessage>,
    pub executor: Arc<Executor>,
}

/// Worker actor that executes one job at a time.
///
/// The actor mailbox is the concurrency bound: a worker does not look at its
/// next message until the current execution has finished.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            pool: args.pool,
            executor: args.executor,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Execute { job_id } => {
                let run = state.executor.run(job_id, &state.worker_id);
                let outcome = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::error!("Worker {} panicked on job {}", state.worker_id, job_id);
                        ExecutionOutcome::Skipped {
                            reason: "executor panicked".to_string(),
                        }
                    }
                };

                state.pool.send_message(PoolMessage::JobFinished {
                    worker_id: state.worker_id.clone(),
                    job_id,
                    outcome,
                })?;
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.worker_id);
                myself.stop(None);
            }
        }

        Ok(())
    }
}
