//! Storage backends behind the status registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};

use staging_core::{Batch, BatchId, Job, JobId, JobState};

use crate::DbError;

/// Boxed future returned by [`JobStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DbError>> + Send + 'a>>;

/// Persistence for jobs and batches.
///
/// Implementations only store and swap records; the transition rules live in
/// [`crate::StatusRegistry`].
pub trait JobStore: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Insert a new job. Fails if the id is taken.
    fn insert_job(&self, job: Job) -> StoreFuture<'_, ()>;

    fn load_job(&self, id: JobId) -> StoreFuture<'_, Option<Job>>;

    /// Replace `job`'s status only if the stored state is still `expected`.
    ///
    /// Returns `false` when the job is missing or its state moved on.
    fn compare_and_set(&self, job: Job, expected: JobState) -> StoreFuture<'_, bool>;

    /// Remove a job. Missing jobs are not an error.
    fn remove_job(&self, id: JobId) -> StoreFuture<'_, ()>;

    fn count_jobs(&self) -> StoreFuture<'_, usize>;

    fn insert_batch(&self, batch: Batch) -> StoreFuture<'_, ()>;

    fn load_batch(&self, id: BatchId) -> StoreFuture<'_, Option<Batch>>;
}

/// Process-local backend for single-node deployments and tests.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    batches: RwLock<HashMap<BatchId, Batch>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn insert_job(&self, job: Job) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
            if jobs.contains_key(&job.id) {
                return Err(DbError::Query(format!("Job already exists: {}", job.id)));
            }
            jobs.insert(job.id, job);
            Ok(())
        })
    }

    fn load_job(&self, id: JobId) -> StoreFuture<'_, Option<Job>> {
        Box::pin(async move {
            let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
            Ok(jobs.get(&id).cloned())
        })
    }

    fn compare_and_set(&self, job: Job, expected: JobState) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
            match jobs.get_mut(&job.id) {
                Some(current) if current.state() == expected => {
                    current.status = job.status;
                    current.updated_at = job.updated_at;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn remove_job(&self, id: JobId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.jobs
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            Ok(())
        })
    }

    fn count_jobs(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            Ok(self
                .jobs
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len())
        })
    }

    fn insert_batch(&self, batch: Batch) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut batches = self.batches.write().unwrap_or_else(PoisonError::into_inner);
            if batches.contains_key(&batch.id) {
                return Err(DbError::Query(format!("Batch already exists: {}", batch.id)));
            }
            batches.insert(batch.id, batch);
            Ok(())
        })
    }

    fn load_batch(&self, id: BatchId) -> StoreFuture<'_, Option<Batch>> {
        Box::pin(async move {
            let batches = self.batches.read().unwrap_or_else(PoisonError::into_inner);
            Ok(batches.get(&id).cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use staging_core::{ArtifactId, JobTransition, StyleParams};

    #[tokio::test]
    async fn compare_and_set_checks_the_stored_state() {
        let store = MemoryJobStore::new();
        let job = Job::new(ArtifactId::new(), StyleParams::default());
        store.insert_job(job.clone()).await.unwrap();
        assert!(store.insert_job(job.clone()).await.is_err());

        let mut started = job.clone();
        started.apply(&JobTransition::start()).unwrap();

        assert!(!store
            .compare_and_set(started.clone(), JobState::Processing)
            .await
            .unwrap());
        assert!(store
            .compare_and_set(started.clone(), JobState::Pending)
            .await
            .unwrap());
        assert!(!store
            .compare_and_set(started, JobState::Pending)
            .await
            .unwrap());

        let stored = store.load_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Processing);
    }

    #[tokio::test]
    async fn missing_jobs_never_swap() {
        let store = MemoryJobStore::new();
        let job = Job::new(ArtifactId::new(), StyleParams::default());
        assert!(!store
            .compare_and_set(job.clone(), JobState::Pending)
            .await
            .unwrap());

        store.remove_job(job.id).await.unwrap();
        assert_eq!(store.count_jobs().await.unwrap(), 0);
        assert!(store.load_job(job.id).await.unwrap().is_none());
    }
}
