//! Batch domain types: a client-visible group of independent jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::job::{JobId, JobState, JobStatus, StyleParams};

/// Unique identifier for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Ulid);

impl BatchId {
    /// Create a new unique batch ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a batch ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aggregate status of a batch, derived from its members on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every member is still waiting for an executor.
    Pending,
    /// At least one member is still in flight.
    Processing,
    /// Every member completed.
    Completed,
    /// Every member failed.
    Failed,
    /// All members are terminal, with at least one success and one failure.
    Partial,
}

impl BatchStatus {
    /// Derive the aggregate status from member statuses. Order does not matter.
    pub fn aggregate<'a>(statuses: impl IntoIterator<Item = &'a JobStatus>) -> Self {
        BatchCounts::tally(statuses).status()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Partial => "partial",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Partial
        )
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-state member counts of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl BatchCounts {
    pub fn tally<'a>(statuses: impl IntoIterator<Item = &'a JobStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.total += 1;
            match status.state() {
                JobState::Pending => counts.pending += 1,
                JobState::Processing => counts.processing += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Members not yet terminal.
    pub fn in_flight(&self) -> usize {
        self.pending + self.processing
    }

    pub fn status(&self) -> BatchStatus {
        if self.in_flight() > 0 || self.total == 0 {
            if self.pending == self.total {
                BatchStatus::Pending
            } else {
                BatchStatus::Processing
            }
        } else if self.completed == self.total {
            BatchStatus::Completed
        } else if self.failed == self.total {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        }
    }
}

/// A batch groups jobs submitted together; it stores membership only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Unique identifier for this batch.
    pub id: BatchId,
    /// Member jobs in submission order.
    pub job_ids: Vec<JobId>,
    /// Style parameters shared by every member.
    pub style: StyleParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// When the batch was created.
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(id: BatchId, job_ids: Vec<JobId>, style: StyleParams) -> Self {
        Self {
            id,
            job_ids,
            style,
            owner_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_owner(mut self, owner_id: Option<String>) -> Self {
        self.owner_id = owner_id;
        self
    }

    pub fn len(&self) -> usize {
        self.job_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.job_ids.is_empty()
    }
}
