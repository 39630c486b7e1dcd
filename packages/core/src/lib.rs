//! Core domain types for the staging pipeline.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and the transition rules for staging jobs
//! - Batch and the derived BatchStatus
//! - Artifact identifiers
//! - Events for push-style updates
//! - Configuration and the error taxonomy

mod artifact;
mod batch;
pub mod config;
pub mod error;
mod events;
mod job;

pub use artifact::{ArtifactId, ArtifactKind};
pub use batch::{Batch, BatchCounts, BatchId, BatchStatus};
pub use config::{ConfigError, RateLimitConfig, StagingConfig};
pub use error::{RateLimitError, TransformError, TransitionError, ValidationError};
pub use events::JobEvent;
pub use job::{
    DEFAULT_ESTIMATED_SECONDS, FailureKind, Job, JobId, JobState, JobStatus, JobTransition,
    QualityMode, StalenessPolicy, StyleParams,
};
