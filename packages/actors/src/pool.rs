//! Pool actor: a FIFO of pending jobs in front of a fixed set of workers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef};
use staging_core::JobId;
use tokio::task::JoinHandle;

use crate::dispatch::{DispatchError, Dispatcher};
use crate::executor::{ExecutionOutcome, Executor};
use crate::messages::{PoolMessage, PoolStats, WorkerMessage};
use crate::worker::{WorkerActor, WorkerArgs};

/// State for the pool actor.
pub struct PoolActorState {
    /// Jobs waiting for a free worker, oldest first.
    queue: VecDeque<JobId>,
    /// Workers by ID.
    workers: HashMap<String, ActorRef<WorkerMessage>>,
    /// Workers with nothing to do.
    idle: VecDeque<String>,
    stats: PoolStats,
}

impl PoolActorState {
    fn assign(&mut self, worker_id: String, job_id: JobId) {
        let Some(worker) = self.workers.get(&worker_id) else {
            self.queue.push_front(job_id);
            return;
        };

        if let Err(e) = worker.send_message(WorkerMessage::Execute { job_id }) {
            tracing::warn!("Worker {} is gone, requeueing job {}: {}", worker_id, job_id, e);
            self.workers.remove(&worker_id);
            self.queue.push_front(job_id);
            return;
        }

        tracing::debug!("Assigned job {} to {}", job_id, worker_id);
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            workers: self.workers.len(),
            busy: self.workers.len().saturating_sub(self.idle.len()),
            queued: self.queue.len(),
            ..self.stats.clone()
        }
    }
}

/// Pool actor arguments.
pub struct PoolArgs {
    pub executor: Arc<Executor>,
    pub workers: usize,
}

/// Pool actor that feeds workers from a FIFO.
pub struct PoolActor;

impl Actor for PoolActor {
    type Msg = PoolMessage;
    type State = PoolActorState;
    type Arguments = PoolArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting executor pool with {} workers", args.workers);

        let mut workers = HashMap::new();
        let mut idle = VecDeque::new();
        for index in 0..args.workers.max(1) {
            let worker_id = format!("worker-{}", index);
            let worker_args = WorkerArgs {
                worker_id: worker_id.clone(),
                pool: myself.clone(),
                executor: args.executor.clone(),
            };
            let (worker, _handle) = Actor::spawn(None, WorkerActor, worker_args)
                .await
                .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;
            workers.insert(worker_id.clone(), worker);
            idle.push_back(worker_id);
        }

        Ok(PoolActorState {
            queue: VecDeque::new(),
            workers,
            idle,
            stats: PoolStats::default(),
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if !state.queue.is_empty() {
            tracing::warn!(
                "Executor pool stopped with {} jobs still queued",
                state.queue.len()
            );
        }
        for worker in state.workers.values() {
            // Queued behind the current job, so in-flight transforms finish.
            let _ = worker.send_message(WorkerMessage::Shutdown);
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PoolMessage::Dispatch { job_id } => match state.idle.pop_front() {
                Some(worker_id) => state.assign(worker_id, job_id),
                None => {
                    state.queue.push_back(job_id);
                    tracing::debug!("Queued job {} ({} waiting)", job_id, state.queue.len());
                }
            },

            PoolMessage::JobFinished {
                worker_id,
                job_id,
                outcome,
            } => {
                match outcome {
                    ExecutionOutcome::Completed { .. } => state.stats.completed += 1,
                    ExecutionOutcome::Failed { .. } => state.stats.failed += 1,
                    ExecutionOutcome::Skipped { reason } => {
                        tracing::debug!("Job {} skipped: {}", job_id, reason);
                        state.stats.skipped += 1;
                    }
                }

                match state.queue.pop_front() {
                    Some(next) => state.assign(worker_id, next),
                    None => state.idle.push_back(worker_id),
                }
            }

            PoolMessage::GetStats { reply } => {
                let _ = reply.send(state.snapshot());
            }

            PoolMessage::Shutdown => {
                tracing::info!("Shutting down executor pool");
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Handle to a running pool; the shipped [`Dispatcher`].
pub struct ExecutorPool {
    actor: ActorRef<PoolMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutorPool {
    /// Spawn the pool actor and its workers.
    pub async fn start(executor: Arc<Executor>, workers: usize) -> Result<Self, DispatchError> {
        let (actor, handle) = Actor::spawn(None, PoolActor, PoolArgs { executor, workers })
            .await
            .map_err(|e| DispatchError::Spawn(e.to_string()))?;

        Ok(Self {
            actor,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub async fn stats(&self) -> Result<PoolStats, DispatchError> {
        let timeout = Duration::from_secs(5);
        let result = ractor::rpc::call(
            &self.actor,
            |reply| PoolMessage::GetStats { reply },
            Some(timeout),
        )
        .await
        .map_err(|e| DispatchError::Unavailable(e.to_string()))?;

        match result {
            ractor::rpc::CallResult::Success(stats) => Ok(stats),
            ractor::rpc::CallResult::Timeout => Err(DispatchError::Timeout),
            ractor::rpc::CallResult::SenderError => {
                Err(DispatchError::Unavailable("pool dropped the request".into()))
            }
        }
    }

    /// Stop the pool. Workers finish their current job first; queued jobs are
    /// left pending in the registry.
    pub async fn shutdown(&self) {
        let _ = self.actor.send_message(PoolMessage::Shutdown);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Dispatcher for ExecutorPool {
    fn dispatch(&self, job_id: JobId) -> Result<(), DispatchError> {
        self.actor
            .send_message(PoolMessage::Dispatch { job_id })
            .map_err(|e| DispatchError::Unavailable(e.to_string()))
    }
}
