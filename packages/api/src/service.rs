//! The staging service: the operations exposed to the web layer.

use std::sync::{Arc, Mutex, PoisonError};

use actors::{Dispatcher, Executor, ExecutorPool, PoolStats, TransformAdapter};
use db::StatusRegistry;
use staging_core::{ArtifactId, BatchId, JobEvent, JobId, StagingConfig};
use storage::ArtifactStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{Result, StagingError};
use crate::rate_limit::{RateLimiter, UsageStats};
use crate::views::JobView;

/// Buffered events per subscriber before old ones are dropped.
const EVENT_CAPACITY: usize = 1024;

pub(crate) struct ServiceInner {
    pub(crate) config: StagingConfig,
    pub(crate) registry: StatusRegistry,
    pub(crate) artifacts: ArtifactStore,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    pub(crate) limiter: Option<Arc<RateLimiter>>,
    pub(crate) event_tx: broadcast::Sender<JobEvent>,
    pool: Option<Arc<ExecutorPool>>,
    /// Artifact sweeper and rate limit purger.
    housekeeping: Mutex<Vec<JoinHandle<()>>>,
}

/// Job intake, polling and artifact access over one registry and store.
///
/// Cheap to clone; clones share the same pool and limiter.
#[derive(Clone)]
pub struct StagingService {
    pub(crate) inner: Arc<ServiceInner>,
}

impl StagingService {
    /// Start a service that runs jobs on its own executor pool.
    pub async fn start(
        config: StagingConfig,
        registry: StatusRegistry,
        artifacts: ArtifactStore,
        adapter: Arc<dyn TransformAdapter>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let executor = Executor::new(registry.clone(), artifacts.clone(), adapter)
            .with_timeout(config.transform_timeout)
            .with_event_tx(event_tx.clone());
        let pool = Arc::new(ExecutorPool::start(Arc::new(executor), config.max_concurrent_jobs).await?);

        tracing::info!(
            "Staging service started with {} workers on {} registry",
            config.max_concurrent_jobs,
            registry.backend()
        );

        Ok(Self::assemble(
            config,
            registry,
            artifacts,
            pool.clone(),
            Some(pool),
            event_tx,
        ))
    }

    /// Build a service that hands accepted jobs to `dispatcher`.
    pub fn with_dispatcher(
        config: StagingConfig,
        registry: StatusRegistry,
        artifacts: ArtifactStore,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self::assemble(
            config, registry, artifacts, dispatcher, None, event_tx,
        ))
    }

    fn assemble(
        config: StagingConfig,
        registry: StatusRegistry,
        artifacts: ArtifactStore,
        dispatcher: Arc<dyn Dispatcher>,
        pool: Option<Arc<ExecutorPool>>,
        event_tx: broadcast::Sender<JobEvent>,
    ) -> Self {
        let limiter = config
            .rate_limit
            .clone()
            .map(|limits| Arc::new(RateLimiter::new(limits)));
        let housekeeping: Vec<JoinHandle<()>> = artifacts
            .spawn_sweeper()
            .into_iter()
            .chain(limiter.as_ref().map(RateLimiter::spawn_purger))
            .collect();
        Self {
            inner: Arc::new(ServiceInner {
                config,
                registry,
                artifacts,
                dispatcher,
                limiter,
                event_tx,
                pool,
                housekeeping: Mutex::new(housekeeping),
            }),
        }
    }

    pub fn config(&self) -> &StagingConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &StatusRegistry {
        &self.inner.registry
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.inner.artifacts
    }

    /// Current state of a job. Reads are monotonic: once terminal, always the same answer.
    pub async fn get_job(&self, job_id: JobId) -> Result<JobView> {
        let job = self.inner.registry.get(job_id).await?;
        Ok(JobView::from(&job))
    }

    /// Receive job events as they happen.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Rate limit usage for `identity`, or `None` when limiting is off.
    pub fn usage(&self, identity: &str) -> Option<UsageStats> {
        self.inner.limiter.as_ref().map(|l| l.usage(identity))
    }

    /// Executor pool counters, when this service owns a pool.
    pub async fn pool_stats(&self) -> Result<Option<PoolStats>> {
        match &self.inner.pool {
            Some(pool) => Ok(Some(pool.stats().await?)),
            None => Ok(None),
        }
    }

    /// Stop the executor pool and the background housekeeping tasks.
    ///
    /// Jobs still queued stay pending and will read as failed once stale.
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.inner.pool {
            pool.shutdown().await;
        }
        let tasks = std::mem::take(
            &mut *self
                .inner
                .housekeeping
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
        tracing::info!("Staging service stopped");
    }

    pub(crate) fn broadcast(&self, event: JobEvent) {
        tracing::debug!("{}", event.description());
        let _ = self.inner.event_tx.send(event);
    }

    pub(crate) fn reserve(&self, identity: &str, slots: u32) -> Result<()> {
        if let Some(limiter) = &self.inner.limiter {
            limiter.try_acquire(identity, slots)?;
        }
        Ok(())
    }

    pub(crate) fn refund(&self, identity: &str, slots: u32) {
        if slots == 0 {
            return;
        }
        if let Some(limiter) = &self.inner.limiter {
            limiter.release(identity, slots);
        }
    }
}

pub fn parse_job_id(s: &str) -> Result<JobId> {
    JobId::parse(s).map_err(|e| StagingError::InvalidId(format!("{}: {}", s, e)))
}

pub fn parse_batch_id(s: &str) -> Result<BatchId> {
    BatchId::parse(s).map_err(|e| StagingError::InvalidId(format!("{}: {}", s, e)))
}

pub fn parse_artifact_id(s: &str) -> Result<ArtifactId> {
    ArtifactId::parse(s).map_err(|e| StagingError::InvalidId(format!("{}: {}", s, e)))
}
