//! Request and response types for the staging service.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use staging_core::{
    ArtifactId, BatchCounts, BatchId, BatchStatus, FailureKind, Job, JobId, JobState, StyleParams,
};

/// One uploaded image.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Bytes,
    /// Content type declared by the client.
    pub content_type: String,
}

impl ImageUpload {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }
}

/// Request to stage a single image.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub image: ImageUpload,
    pub style: StyleParams,
    pub owner_id: Option<String>,
    /// Rate-limit identity such as the client address.
    pub client_key: Option<String>,
}

impl CreateJobRequest {
    pub fn new(image: ImageUpload, style: StyleParams) -> Self {
        Self {
            image,
            style,
            owner_id: None,
            client_key: None,
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_client_key(mut self, client_key: impl Into<String>) -> Self {
        self.client_key = Some(client_key.into());
        self
    }
}

/// Request to stage several images with the same style.
#[derive(Debug, Clone)]
pub struct CreateBatchRequest {
    pub images: Vec<ImageUpload>,
    pub style: StyleParams,
    pub owner_id: Option<String>,
    pub client_key: Option<String>,
}

impl CreateBatchRequest {
    pub fn new(images: Vec<ImageUpload>, style: StyleParams) -> Self {
        Self {
            images,
            style,
            owner_id: None,
            client_key: None,
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_client_key(mut self, client_key: impl Into<String>) -> Self {
        self.client_key = Some(client_key.into());
        self
    }
}

/// Returned by `create_job` as soon as the job is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAccepted {
    pub job_id: JobId,
    pub status: JobState,
    pub estimated_seconds: u64,
}

/// What a polling client sees for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_ref: Option<ArtifactId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_ref: Option<ArtifactId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    pub style: StyleParams,
    pub estimated_seconds: u64,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.state(),
            original_ref: job.input,
            staged_ref: job.output(),
            error: job.error().map(str::to_string),
            failure_kind: job.failure_kind(),
            processing_time_ms: job.processing_time_ms(),
            quality_score: job.quality_score(),
            style: job.style.clone(),
            estimated_seconds: job.estimated_seconds,
            submitted_at: job.submitted_at,
            started_at: job.started_at(),
            completed_at: job.completed_at(),
            batch_id: job.batch_id,
        }
    }
}

/// One member of a freshly created batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.state(),
            error: job.error().map(str::to_string),
        }
    }
}

/// Returned by `create_batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAccepted {
    pub batch_id: BatchId,
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub jobs: Vec<JobSummary>,
    pub estimated_seconds: u64,
}

/// Aggregate progress of a batch, recomputed on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusView {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub jobs: Vec<JobView>,
}

impl BatchStatusView {
    pub fn new(batch_id: BatchId, jobs: &[Job]) -> Self {
        let counts = BatchCounts::tally(jobs.iter().map(|job| &job.status));
        Self {
            batch_id,
            status: counts.status(),
            total: counts.total,
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            jobs: jobs.iter().map(JobView::from).collect(),
        }
    }
}

/// Bytes of a stored image.
#[derive(Debug, Clone)]
pub struct ArtifactPayload {
    pub id: ArtifactId,
    pub bytes: Bytes,
    pub content_type: String,
}
