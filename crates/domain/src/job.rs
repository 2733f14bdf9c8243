//! Status of a server-side asynchronous job ("task").

use serde::{Deserialize, Serialize};

/// Error codes that mean the job failed because a quota ran out.
pub const RATE_LIMIT_ERROR_CODES: &[&str] = &[
    "8",
    "RESOURCE_EXHAUSTED",
    "RATE_LIMITED",
    "QUOTA_EXCEEDED",
    "USER_QUOTA_EXCEEDED",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobState {
    /// `Completed` and `Failed` end polling.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// One observation of a job, recomputed on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub task_id: String,
    pub status: JobState,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

impl JobStatus {
    pub fn new(task_id: impl Into<String>, status: JobState) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            error: None,
            error_code: None,
        }
    }

    pub fn failed(
        task_id: impl Into<String>,
        error: impl Into<String>,
        error_code: Option<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: JobState::Failed,
            error: Some(error.into()),
            error_code,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == JobState::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobState::Failed
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Failed because of quota or rate exhaustion.
    pub fn is_rate_limited(&self) -> bool {
        self.is_failed()
            && self.error_code.as_deref().is_some_and(|code| {
                RATE_LIMIT_ERROR_CODES
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(code))
            })
    }
}
