//! The status registry: the single source of truth for job state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use staging_core::{
    Batch, BatchId, FailureKind, Job, JobId, JobTransition, StalenessPolicy, TransitionError,
};

use crate::repositories::SurrealJobStore;
use crate::store::{JobStore, MemoryJobStore};
use crate::{DbConfig, DbError};

/// Job and batch registry over an injected [`JobStore`].
///
/// Every status change goes through [`StatusRegistry::update`], which applies
/// the job state machine and then compare-and-sets the stored status, so
/// concurrent writers to one job serialize and terminal states never change.
#[derive(Clone)]
pub struct StatusRegistry {
    store: Arc<dyn JobStore>,
    staleness: StalenessPolicy,
}

impl StatusRegistry {
    pub fn new(store: Arc<dyn JobStore>, staleness: StalenessPolicy) -> Self {
        Self { store, staleness }
    }

    /// Registry backed by process memory.
    pub fn in_memory(staleness: StalenessPolicy) -> Self {
        Self::new(Arc::new(MemoryJobStore::new()), staleness)
    }

    /// Registry backed by SurrealDB.
    pub async fn surreal(config: &DbConfig, staleness: StalenessPolicy) -> Result<Self, DbError> {
        let store = SurrealJobStore::connect(config).await?;
        Ok(Self::new(Arc::new(store), staleness))
    }

    pub fn backend(&self) -> &str {
        self.store.name()
    }

    pub fn staleness(&self) -> StalenessPolicy {
        self.staleness
    }

    /// Register a new job.
    pub async fn create(&self, job: Job) -> Result<Job, DbError> {
        self.store.insert_job(job.clone()).await?;
        tracing::debug!("Registered job {} as {}", job.id, job.status.as_str());
        Ok(job)
    }

    /// Read a job, failing processing jobs that outlived their staleness budget.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        self.get_at(id, Utc::now()).await
    }

    /// [`StatusRegistry::get`] evaluated at `now`.
    pub async fn get_at(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, DbError> {
        let job = self.load(id).await?;

        let Some(timeout) = self.staleness.timeout_transition(&job, now) else {
            return Ok(job);
        };

        match self.update(id, timeout).await {
            Ok(failed) => {
                tracing::warn!(
                    "Job {} exceeded its processing budget, marked failed",
                    id
                );
                Ok(failed)
            }
            // The executor finished first; its result stands.
            Err(DbError::InvalidTransition(_)) => self.load(id).await,
            Err(e) => Err(e),
        }
    }

    /// Apply `transition` to a job if the state machine allows it.
    pub async fn update(&self, id: JobId, transition: JobTransition) -> Result<Job, DbError> {
        let mut job = self.load(id).await?;
        job.apply(&transition)?;

        if self
            .store
            .compare_and_set(job.clone(), transition.source())
            .await?
        {
            return Ok(job);
        }

        let current = self.load(id).await?;
        Err(DbError::InvalidTransition(TransitionError {
            from: current.state(),
            to: transition.target(),
        }))
    }

    /// Remove a job. Used to roll back an intake that could not finish.
    pub async fn delete(&self, id: JobId) -> Result<(), DbError> {
        self.store.remove_job(id).await
    }

    /// Number of registered jobs.
    pub async fn job_count(&self) -> Result<usize, DbError> {
        self.store.count_jobs().await
    }

    pub async fn create_batch(&self, batch: Batch) -> Result<Batch, DbError> {
        self.store.insert_batch(batch.clone()).await?;
        tracing::debug!("Registered batch {} with {} jobs", batch.id, batch.len());
        Ok(batch)
    }

    pub async fn get_batch(&self, id: BatchId) -> Result<Batch, DbError> {
        self.store
            .load_batch(id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Batch not found: {}", id)))
    }

    /// Current state of every member of `batch`, in submission order.
    ///
    /// A member whose record is gone reads as failed.
    pub async fn batch_jobs(&self, batch: &Batch) -> Result<Vec<Job>, DbError> {
        let now = Utc::now();
        let mut jobs = Vec::with_capacity(batch.len());
        for id in &batch.job_ids {
            match self.get_at(*id, now).await {
                Ok(job) => jobs.push(job),
                Err(DbError::NotFound(_)) => {
                    tracing::warn!("Batch {} member {} has no record", batch.id, id);
                    jobs.push(
                        Job::failed_on_intake(
                            batch.style.clone(),
                            "job record missing",
                            FailureKind::Internal,
                        )
                        .with_id(*id)
                        .with_owner(batch.owner_id.clone())
                        .with_batch(batch.id),
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(jobs)
    }

    async fn load(&self, id: JobId) -> Result<Job, DbError> {
        self.store
            .load_job(id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use staging_core::{ArtifactId, FailureKind, JobState, StyleParams};

    fn registry() -> StatusRegistry {
        StatusRegistry::in_memory(StalenessPolicy::default())
    }

    #[tokio::test]
    async fn rejects_transitions_the_state_machine_forbids() {
        let registry = registry();
        let job = registry
            .create(Job::new(ArtifactId::new(), StyleParams::default()))
            .await
            .unwrap();

        let err = registry
            .update(job.id, JobTransition::complete(ArtifactId::new(), 1, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::InvalidTransition(TransitionError {
                from: JobState::Pending,
                to: JobState::Completed
            })
        ));
    }

    #[tokio::test]
    async fn stale_reads_are_persisted() {
        let registry = registry();
        let job = registry
            .create(
                Job::new(ArtifactId::new(), StyleParams::default()).with_estimated_seconds(10),
            )
            .await
            .unwrap();
        registry.update(job.id, JobTransition::start()).await.unwrap();

        let later = Utc::now() + TimeDelta::seconds(60);
        let stale = registry.get_at(job.id, later).await.unwrap();
        assert_eq!(stale.failure_kind(), Some(FailureKind::Stale));

        // A plain read afterwards sees the same failure, not processing.
        let again = registry.get(job.id).await.unwrap();
        assert_eq!(again.status, stale.status);

        let late = registry
            .update(job.id, JobTransition::complete(ArtifactId::new(), 5, None))
            .await;
        assert!(matches!(late, Err(DbError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let registry = registry();
        assert!(registry.get(JobId::new()).await.unwrap_err().is_not_found());
        assert!(
            registry
                .update(JobId::new(), JobTransition::start())
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            registry
                .get_batch(BatchId::new())
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}
