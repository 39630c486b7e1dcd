//! SurrealDB-backed job persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use staging_core::{
    ArtifactId, Batch, BatchId, Job, JobId, JobState, JobStatus, StyleParams,
};

use crate::store::{JobStore, StoreFuture};
use crate::{Database, DbConfig, DbError, connect};

/// [`JobStore`] over a SurrealDB connection.
///
/// Each store owns its connection; there is no process-global handle.
#[derive(Clone)]
pub struct SurrealJobStore {
    pub(crate) db: Database,
}

/// Job record as stored. The record id carries the job id.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    status: JobStatus,
    #[serde(default)]
    input: Option<ArtifactId>,
    style: StyleParams,
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default)]
    batch_id: Option<BatchId>,
    estimated_seconds: u64,
    submitted_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn from_job(job: Job) -> Self {
        Self {
            status: job.status,
            input: job.input,
            style: job.style,
            owner_id: job.owner_id,
            batch_id: job.batch_id,
            estimated_seconds: job.estimated_seconds,
            submitted_at: job.submitted_at,
            updated_at: job.updated_at,
        }
    }

    fn into_job(self, id: JobId) -> Job {
        Job {
            id,
            status: self.status,
            input: self.input,
            style: self.style,
            owner_id: self.owner_id,
            batch_id: self.batch_id,
            estimated_seconds: self.estimated_seconds,
            submitted_at: self.submitted_at,
            updated_at: self.updated_at,
        }
    }
}

impl SurrealJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Connect with `config` and apply the schema.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        Ok(Self::new(connect(config).await?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Create a new job in the database.
    pub async fn create(&self, job: Job) -> Result<(), DbError> {
        let id = job.id;
        let record: Option<JobRecord> = self
            .db
            .create(("job", id.to_string()))
            .content(JobRecord::from_job(job))
            .await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::Query(format!("Failed to create job {}", id)))
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let record: Option<JobRecord> = self.db.select(("job", id.to_string())).await?;
        Ok(record.map(|r| r.into_job(id)))
    }

    /// Swap a job's status if its stored state still matches `expected`.
    pub async fn swap_status(&self, job: Job, expected: JobState) -> Result<bool, DbError> {
        let mut result = self
            .db
            .query(
                "UPDATE type::thing('job', $id) \
                 SET status = $status, updated_at = $updated_at \
                 WHERE status.status = $expected RETURN AFTER",
            )
            .bind(("id", job.id.to_string()))
            .bind(("status", job.status))
            .bind(("updated_at", job.updated_at))
            .bind(("expected", expected.as_str()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(!records.is_empty())
    }

    /// Delete a job.
    pub async fn delete(&self, id: JobId) -> Result<(), DbError> {
        let _: Option<JobRecord> = self.db.delete(("job", id.to_string())).await?;
        Ok(())
    }

    /// Count all stored jobs.
    pub async fn count(&self) -> Result<usize, DbError> {
        let mut result = self.db.query("SELECT count() FROM job GROUP ALL").await?;

        #[derive(Deserialize)]
        struct CountResult {
            count: i64,
        }

        let counts: Vec<CountResult> = result.take(0)?;
        Ok(counts.first().map(|c| c.count.max(0) as usize).unwrap_or(0))
    }
}

impl JobStore for SurrealJobStore {
    fn name(&self) -> &str {
        "surrealdb"
    }

    fn insert_job(&self, job: Job) -> StoreFuture<'_, ()> {
        Box::pin(self.create(job))
    }

    fn load_job(&self, id: JobId) -> StoreFuture<'_, Option<Job>> {
        Box::pin(self.get(id))
    }

    fn compare_and_set(&self, job: Job, expected: JobState) -> StoreFuture<'_, bool> {
        Box::pin(self.swap_status(job, expected))
    }

    fn remove_job(&self, id: JobId) -> StoreFuture<'_, ()> {
        Box::pin(self.delete(id))
    }

    fn count_jobs(&self) -> StoreFuture<'_, usize> {
        Box::pin(self.count())
    }

    fn insert_batch(&self, batch: Batch) -> StoreFuture<'_, ()> {
        Box::pin(self.create_batch(batch))
    }

    fn load_batch(&self, id: BatchId) -> StoreFuture<'_, Option<Batch>> {
        Box::pin(self.get_batch(id))
    }
}
