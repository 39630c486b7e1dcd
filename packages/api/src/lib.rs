//! Service API for the staging pipeline.
//!
//! This crate contains the operations the web layer calls:
//! - Job intake and polling (create, get)
//! - Batches (create, aggregate status)
//! - Artifact download and rate limit usage
//! - Event subscription for push-style updates

mod artifacts;
mod batches;
mod error;
mod init;
mod intake;
pub mod rate_limit;
mod service;
mod views;

pub use error::{Result, StagingError};
pub use init::init_staging;
pub use intake::validate_upload;
pub use rate_limit::{RateLimiter, UsageStats};
pub use service::{StagingService, parse_artifact_id, parse_batch_id, parse_job_id};
pub use views::{
    ArtifactPayload, BatchAccepted, BatchStatusView, CreateBatchRequest, CreateJobRequest,
    ImageUpload, JobAccepted, JobSummary, JobView,
};

// Re-export core types for convenience
pub use staging_core::{
    ArtifactId, BatchId, BatchStatus, FailureKind, Job, JobEvent, JobId, JobState, QualityMode,
    StagingConfig, StyleParams,
};
