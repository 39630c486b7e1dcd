//! Error taxonomy shared by intake, executors and the registry.

use thiserror::Error;

use crate::job::{FailureKind, JobState};

/// Input rejected synchronously at intake. No job is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Image payload is empty")]
    EmptyPayload,
    #[error("File too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
    #[error("Unsupported content type: {0}")]
    UnsupportedMediaType(String),
    #[error("Payload is not a supported image")]
    NotAnImage,
    #[error("Image too small: {width}x{height} (minimum {min}x{min} pixels)")]
    TooSmall { width: u32, height: u32, min: u32 },
    #[error("At least one image required")]
    EmptyBatch,
    #[error("Maximum {max} images allowed per batch (got {count})")]
    BatchTooLarge { count: usize, max: usize },
}

/// The caller exhausted its quota. No job or artifact is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("Daily limit of {limit} reached for {identity}")]
    IdentityExhausted { identity: String, limit: u32 },
    #[error("Global daily limit of {limit} reached")]
    GlobalExhausted { limit: u32 },
}

/// A transform attempt failed. Captured on the job, never raised to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("AI transform timed out after {0}s")]
    Timeout(u64),
    #[error("AI transform failed: {0}")]
    Adapter(String),
    #[error("AI transform refused the image: {0}")]
    Rejected(String),
    #[error("AI transform returned an unusable image: {0}")]
    MalformedResponse(String),
    #[error("Input image unavailable: {0}")]
    MissingInput(String),
    #[error("Failed to store staged image: {0}")]
    Storage(String),
}

impl TransformError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TransformError::Timeout(_) => FailureKind::Timeout,
            TransformError::Adapter(_)
            | TransformError::Rejected(_)
            | TransformError::MalformedResponse(_) => FailureKind::Transform,
            TransformError::MissingInput(_) | TransformError::Storage(_) => FailureKind::Internal,
        }
    }
}

/// A status change that the job state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}
