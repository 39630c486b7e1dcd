//! SurrealDB-backed batch persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use staging_core::{Batch, BatchId, JobId, StyleParams};

use super::SurrealJobStore;
use crate::DbError;

/// Batch record as stored. Member statuses are never copied here.
#[derive(Debug, Serialize, Deserialize)]
struct BatchRecord {
    job_ids: Vec<JobId>,
    style: StyleParams,
    #[serde(default)]
    owner_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl BatchRecord {
    fn into_batch(self, id: BatchId) -> Batch {
        Batch {
            id,
            job_ids: self.job_ids,
            style: self.style,
            owner_id: self.owner_id,
            created_at: self.created_at,
        }
    }
}

impl SurrealJobStore {
    /// Create a new batch in the database.
    pub async fn create_batch(&self, batch: Batch) -> Result<(), DbError> {
        let id = batch.id;
        let record = BatchRecord {
            job_ids: batch.job_ids,
            style: batch.style,
            owner_id: batch.owner_id,
            created_at: batch.created_at,
        };

        let created: Option<BatchRecord> = self
            .db
            .create(("batch", id.to_string()))
            .content(record)
            .await?;

        created
            .map(|_| ())
            .ok_or_else(|| DbError::Query(format!("Failed to create batch {}", id)))
    }

    /// Get a batch by ID.
    pub async fn get_batch(&self, id: BatchId) -> Result<Option<Batch>, DbError> {
        let record: Option<BatchRecord> = self.db.select(("batch", id.to_string())).await?;
        Ok(record.map(|r| r.into_batch(id)))
    }
}
