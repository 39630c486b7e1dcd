//! Job domain types and the job state machine.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::artifact::ArtifactId;
use crate::batch::BatchId;
use crate::error::TransitionError;

/// Default estimate for a single staging run, in seconds.
pub const DEFAULT_ESTIMATED_SECONDS: u64 = 25;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rendering quality requested from the transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    Standard,
    #[default]
    Premium,
}

impl std::fmt::Display for QualityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityMode::Standard => write!(f, "standard"),
            QualityMode::Premium => write!(f, "premium"),
        }
    }
}

/// Style parameters forwarded untouched to the AI transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleParams {
    /// Named staging style.
    pub style: String,
    /// Room type hint; `None` lets the model detect it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_type: Option<String>,
    pub quality_mode: QualityMode,
}

impl Default for StyleParams {
    fn default() -> Self {
        Self {
            style: "default".to_string(),
            room_type: None,
            quality_mode: QualityMode::default(),
        }
    }
}

impl StyleParams {
    pub fn new(style: impl Into<String>) -> Self {
        Self {
            style: style.into(),
            ..Self::default()
        }
    }

    pub fn with_room_type(mut self, room_type: impl Into<String>) -> Self {
        self.room_type = Some(room_type.into());
        self
    }

    pub fn with_quality_mode(mut self, quality_mode: QualityMode) -> Self {
        self.quality_mode = quality_mode;
        self
    }
}

/// Why a job ended up failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The submitted image was rejected (batch members only).
    Validation,
    /// The adapter returned an error, a refusal or an unusable payload.
    Transform,
    /// The adapter did not answer within the hard timeout.
    Timeout,
    /// The job sat in processing past its staleness budget.
    Stale,
    /// Storage or registry trouble while executing.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::Transform => "transform",
            FailureKind::Timeout => "timeout",
            FailureKind::Stale => "stale",
            FailureKind::Internal => "internal",
        }
    }
}

/// Fieldless view of a job's status, used for comparisons and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a job in its lifecycle.
///
/// State-specific data lives inside the variant: only `Completed` carries an
/// output artifact and only `Failed` carries an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for a free executor.
    #[default]
    Pending,
    /// The executor has picked the job up and is waiting on the transform.
    Processing { started_at: DateTime<Utc> },
    /// The transform succeeded and the staged image is stored.
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        output: ArtifactId,
        processing_time_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quality_score: Option<f64>,
    },
    /// The job failed; `error` is shown to the user as-is.
    Failed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        started_at: Option<DateTime<Utc>>,
        failed_at: DateTime<Utc>,
        error: String,
        kind: FailureKind,
    },
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        match self {
            JobStatus::Pending => JobState::Pending,
            JobStatus::Processing { .. } => JobState::Processing,
            JobStatus::Completed { .. } => JobState::Completed,
            JobStatus::Failed { .. } => JobState::Failed,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        self.state().as_str()
    }

    /// Apply a transition, returning the next status.
    ///
    /// Only `pending -> processing -> {completed | failed}` is allowed.
    pub fn apply(&self, transition: &JobTransition) -> Result<JobStatus, TransitionError> {
        let invalid = || TransitionError {
            from: self.state(),
            to: transition.target(),
        };

        match (self, transition) {
            (JobStatus::Pending, JobTransition::Start { at }) => {
                Ok(JobStatus::Processing { started_at: *at })
            }
            (
                JobStatus::Processing { started_at },
                JobTransition::Complete {
                    output,
                    processing_time_ms,
                    quality_score,
                    at,
                },
            ) => Ok(JobStatus::Completed {
                started_at: *started_at,
                completed_at: *at,
                output: *output,
                processing_time_ms: *processing_time_ms,
                quality_score: *quality_score,
            }),
            (JobStatus::Processing { started_at }, JobTransition::Fail { error, kind, at }) => {
                Ok(JobStatus::Failed {
                    started_at: Some(*started_at),
                    failed_at: *at,
                    error: error.clone(),
                    kind: *kind,
                })
            }
            _ => Err(invalid()),
        }
    }
}

/// A requested status change, carried to the status registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum JobTransition {
    Start {
        at: DateTime<Utc>,
    },
    Complete {
        output: ArtifactId,
        processing_time_ms: u64,
        quality_score: Option<f64>,
        at: DateTime<Utc>,
    },
    Fail {
        error: String,
        kind: FailureKind,
        at: DateTime<Utc>,
    },
}

impl JobTransition {
    pub fn start() -> Self {
        JobTransition::Start { at: Utc::now() }
    }

    pub fn complete(output: ArtifactId, processing_time_ms: u64, quality_score: Option<f64>) -> Self {
        JobTransition::Complete {
            output,
            processing_time_ms,
            quality_score,
            at: Utc::now(),
        }
    }

    pub fn fail(error: impl Into<String>, kind: FailureKind) -> Self {
        JobTransition::Fail {
            error: error.into(),
            kind,
            at: Utc::now(),
        }
    }

    /// The state this transition moves a job into.
    pub fn target(&self) -> JobState {
        match self {
            JobTransition::Start { .. } => JobState::Processing,
            JobTransition::Complete { .. } => JobState::Completed,
            JobTransition::Fail { .. } => JobState::Failed,
        }
    }

    /// The only state this transition may be applied from.
    pub fn source(&self) -> JobState {
        match self {
            JobTransition::Start { .. } => JobState::Pending,
            JobTransition::Complete { .. } | JobTransition::Fail { .. } => JobState::Processing,
        }
    }
}

/// A staging job: one uploaded photo on its way to a staged photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Current status.
    pub status: JobStatus,
    /// The stored original image. `None` only for batch members rejected at intake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ArtifactId>,
    /// Style parameters for the transform.
    pub style: StyleParams,
    /// Owner or context id supplied by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Batch this job belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    /// Expected processing time, used for client hints and staleness.
    pub estimated_seconds: u64,
    /// When the job was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job for a stored input image.
    pub fn new(input: ArtifactId, style: StyleParams) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            input: Some(input),
            style,
            owner_id: None,
            batch_id: None,
            estimated_seconds: DEFAULT_ESTIMATED_SECONDS,
            submitted_at: now,
            updated_at: now,
        }
    }

    /// Create a job that is failed from the start because its image was rejected.
    pub fn rejected(style: StyleParams, error: impl Into<String>) -> Self {
        Self::failed_on_intake(style, error, FailureKind::Validation)
    }

    /// Create a job that failed before it ever reached an executor.
    pub fn failed_on_intake(style: StyleParams, error: impl Into<String>, kind: FailureKind) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Failed {
                started_at: None,
                failed_at: now,
                error: error.into(),
                kind,
            },
            input: None,
            style,
            owner_id: None,
            batch_id: None,
            estimated_seconds: 0,
            submitted_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    pub fn with_owner(mut self, owner_id: Option<String>) -> Self {
        self.owner_id = owner_id;
        self
    }

    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_estimated_seconds(mut self, estimated_seconds: u64) -> Self {
        self.estimated_seconds = estimated_seconds;
        self
    }

    /// Apply a transition in place.
    pub fn apply(&mut self, transition: &JobTransition) -> Result<(), TransitionError> {
        self.status = self.status.apply(transition)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn state(&self) -> JobState {
        self.status.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The staged image, set if and only if the job completed.
    pub fn output(&self) -> Option<ArtifactId> {
        match &self.status {
            JobStatus::Completed { output, .. } => Some(*output),
            _ => None,
        }
    }

    /// The failure message, set if and only if the job failed.
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.status {
            JobStatus::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            JobStatus::Pending => None,
            JobStatus::Processing { started_at } | JobStatus::Completed { started_at, .. } => {
                Some(*started_at)
            }
            JobStatus::Failed { started_at, .. } => *started_at,
        }
    }

    /// When the job reached a terminal state.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            JobStatus::Completed { completed_at, .. } => Some(*completed_at),
            JobStatus::Failed { failed_at, .. } => Some(*failed_at),
            _ => None,
        }
    }

    pub fn processing_time_ms(&self) -> Option<u64> {
        match &self.status {
            JobStatus::Completed {
                processing_time_ms, ..
            } => Some(*processing_time_ms),
            _ => None,
        }
    }

    pub fn quality_score(&self) -> Option<f64> {
        match &self.status {
            JobStatus::Completed { quality_score, .. } => *quality_score,
            _ => None,
        }
    }
}

/// Decides when a processing job is considered abandoned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StalenessPolicy {
    /// Multiple of the job's estimate a job may spend in processing.
    pub multiplier: f64,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self { multiplier: 2.0 }
    }
}

impl StalenessPolicy {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }

    /// Time a job may spend in processing before it is treated as failed.
    pub fn budget(&self, job: &Job) -> TimeDelta {
        let millis = job.estimated_seconds as f64 * self.multiplier * 1000.0;
        TimeDelta::milliseconds(millis.max(0.0) as i64)
    }

    pub fn is_stale(&self, job: &Job, now: DateTime<Utc>) -> bool {
        match job.status {
            JobStatus::Processing { started_at } => now - started_at > self.budget(job),
            _ => false,
        }
    }

    /// The failure to record for a stale job, or `None` if the job is fine.
    pub fn timeout_transition(&self, job: &Job, now: DateTime<Utc>) -> Option<JobTransition> {
        if !self.is_stale(job, now) {
            return None;
        }

        Some(JobTransition::Fail {
            error: format!(
                "Processing timed out after {}s without a result",
                self.budget(job).num_seconds()
            ),
            kind: FailureKind::Stale,
            at: now,
        })
    }
}
