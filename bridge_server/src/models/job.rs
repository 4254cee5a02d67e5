//! Remote job vocabulary and its translation onto GitHub commit statuses.

use serde::{Deserialize, Serialize};

/// GitHub rejects status updates whose description exceeds this.
pub const MAX_DESCRIPTION_LEN: usize = 140;

/// Remote job state as reported by the builds service.
///
/// Terminal states end monitoring. Non-terminal states may cycle
/// pending → queued → running but never regress to pending after running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Success,
    Failed,
    Timeout,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Job visibility on the builds service, derived from the head repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "PUBLIC",
            Self::Private => "PRIVATE",
        }
    }
}

/// GitHub commit-status state vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusState {
    Pending,
    Success,
    Error,
    Failure,
}

impl StatusState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
            Self::Failure => "failure",
        }
    }
}

/// Translate a job status into the commit-status state and description.
///
/// The match is exhaustive on purpose: a new remote status must be mapped
/// here before it compiles, never silently defaulted.
pub fn commit_status_for(status: JobStatus) -> (StatusState, &'static str) {
    match status {
        JobStatus::Pending => (StatusState::Pending, "job pending…"),
        JobStatus::Queued => (StatusState::Pending, "job queued…"),
        JobStatus::Running => (StatusState::Pending, "job running…"),
        JobStatus::Success => (StatusState::Success, "job completed"),
        JobStatus::Failed => (StatusState::Error, "job failed"),
        JobStatus::Timeout => (StatusState::Failure, "job timed out"),
        JobStatus::Cancelled => (StatusState::Failure, "job cancelled"),
    }
}

/// Cap a status description to what GitHub accepts.
pub fn truncate_description(description: &str) -> String {
    if description.chars().count() <= MAX_DESCRIPTION_LEN {
        return description.to_string();
    }
    description.chars().take(MAX_DESCRIPTION_LEN).collect()
}
