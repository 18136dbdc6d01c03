//! Job lifecycle state machine.
//!
//! A [`Job`] moves monotonically along
//! `idle -> pending -> processing -> {success, failure}`. Every mutation
//! goes through [`Job::apply`], which silently discards any update that
//! would move the job backwards or touch a terminal job. This is what makes
//! out-of-order or late status responses harmless.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ErrorKind, JobError};
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Remote status strings
// ---------------------------------------------------------------------------

/// Remote status strings meaning "accepted, not started yet".
pub const REMOTE_PREPARING: &[&str] = &["preparing", "not-started", "queued"];
/// Remote status strings meaning "running".
pub const REMOTE_PROCESSING: &[&str] = &["processing", "running", "started", "uploading"];
/// Remote status string for a finished job.
pub const REMOTE_SUCCESS: &str = "success";
/// Remote status strings for a job that ended badly.
pub const REMOTE_FAILURE: &[&str] = &["failure", "failed", "error", "timeout", "cancelled"];

/// Normalized remote status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Preparing,
    Processing,
    Success,
    Failure,
    /// A status string this client does not know. Treated as in-progress.
    Other(String),
}

impl RemoteStatus {
    /// Normalize a raw status string (case-insensitive, trimmed).
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim().to_ascii_lowercase();
        if REMOTE_PREPARING.contains(&s.as_str()) {
            Self::Preparing
        } else if REMOTE_PROCESSING.contains(&s.as_str()) {
            Self::Processing
        } else if s == REMOTE_SUCCESS {
            Self::Success
        } else if REMOTE_FAILURE.contains(&s.as_str()) {
            Self::Failure
        } else {
            Self::Other(raw.trim().to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// No identifier assigned yet.
    Idle,
    /// Identifier assigned; the remote has not reported it running.
    Pending,
    Processing,
    Success,
    Failure,
}

impl JobPhase {
    /// Position in the lifecycle order; both terminal phases share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Pending => 1,
            Self::Processing => 2,
            Self::Success | Self::Failure => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    /// Whether moving from `self` to `next` respects the monotonic order.
    ///
    /// Terminal phases accept nothing. Staying in the same non-terminal
    /// phase is allowed (status text refreshes).
    pub fn can_advance_to(self, next: JobPhase) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// A single observation about a job, usually derived from a status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// Remote accepted the job but has not started it.
    Preparing { status_text: String },
    /// Remote reports the job running.
    InProgress { status_text: String },
    /// Remote reports success with these artifact URLs (never empty).
    Succeeded { outputs: Vec<String> },
    Failed(JobError),
}

impl StatusUpdate {
    pub fn phase(&self) -> JobPhase {
        match self {
            Self::Preparing { .. } => JobPhase::Pending,
            Self::InProgress { .. } => JobPhase::Processing,
            Self::Succeeded { .. } => JobPhase::Success,
            Self::Failed(_) => JobPhase::Failure,
        }
    }

    /// Build an update from a normalized remote status and its outputs.
    ///
    /// A success without any artifact URL breaks the contract and is
    /// reported as a malformed response.
    pub fn from_remote(status: RemoteStatus, raw: &str, outputs: Vec<String>) -> Self {
        match status {
            RemoteStatus::Preparing => Self::Preparing {
                status_text: raw.to_string(),
            },
            RemoteStatus::Processing | RemoteStatus::Other(_) => Self::InProgress {
                status_text: raw.to_string(),
            },
            RemoteStatus::Success if outputs.is_empty() => Self::Failed(JobError::new(
                ErrorKind::MalformedResponse,
                "Remote reported success without any output image",
            )),
            RemoteStatus::Success => Self::Succeeded { outputs },
            RemoteStatus::Failure => Self::Failed(JobError::new(
                ErrorKind::RemoteFailure,
                format!("Remote reported status '{raw}'"),
            )),
        }
    }
}

/// Outcome of [`Job::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The phase moved forward.
    Advanced,
    /// Same phase, but the status text changed.
    Refreshed,
    /// Nothing observable changed.
    Unchanged,
    /// The update would have regressed the job and was dropped.
    Discarded,
}

impl Applied {
    pub fn changed(self) -> bool {
        matches!(self, Self::Advanced | Self::Refreshed)
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Client-side view of one remote generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Option<JobId>,
    pub phase: JobPhase,
    /// Human-readable status line, e.g. `"processing"` or `"Uploading..."`.
    pub status_text: Option<String>,
    /// Artifact URLs, populated only in `success`.
    pub outputs: Vec<String>,
    /// Populated only in `failure`.
    pub error: Option<JobError>,
    pub updated_at: Timestamp,
}

impl Job {
    /// A slot with no job yet.
    pub fn idle() -> Self {
        Self {
            id: None,
            phase: JobPhase::Idle,
            status_text: None,
            outputs: Vec::new(),
            error: None,
            updated_at: chrono::Utc::now(),
        }
    }

    /// A freshly submitted job whose first status check has not returned.
    pub fn pending(id: JobId) -> Self {
        Self {
            id: Some(id),
            phase: JobPhase::Pending,
            status_text: Some("preparing".to_string()),
            ..Self::idle()
        }
    }

    /// A submission that never produced an identifier.
    pub fn rejected(error: JobError) -> Self {
        Self {
            phase: JobPhase::Failure,
            error: Some(error),
            ..Self::idle()
        }
    }

    /// Assign an identifier to an idle slot (`idle -> pending`).
    pub fn assign(&mut self, id: JobId) -> Result<(), CoreError> {
        if self.phase != JobPhase::Idle {
            return Err(CoreError::Conflict(format!(
                "Cannot assign job id {id} to a slot in phase '{}'",
                self.phase.as_str()
            )));
        }
        *self = Self::pending(id);
        Ok(())
    }

    /// Apply an update, enforcing monotonic transitions.
    pub fn apply(&mut self, update: StatusUpdate) -> Applied {
        let next = update.phase();
        if self.phase == JobPhase::Idle || !self.phase.can_advance_to(next) {
            return Applied::Discarded;
        }
        let advanced = next != self.phase;

        match update {
            StatusUpdate::Preparing { status_text } | StatusUpdate::InProgress { status_text } => {
                if !advanced && self.status_text.as_deref() == Some(status_text.as_str()) {
                    return Applied::Unchanged;
                }
                self.status_text = Some(status_text);
            }
            StatusUpdate::Succeeded { outputs } => {
                self.status_text = Some("success".to_string());
                self.outputs = outputs;
            }
            StatusUpdate::Failed(error) => {
                self.status_text = Some(error.message.clone());
                self.error = Some(error);
            }
        }

        self.phase = next;
        self.updated_at = chrono::Utc::now();
        if advanced {
            Applied::Advanced
        } else {
            Applied::Refreshed
        }
    }

    /// Force the job into `failure` unless it is already terminal.
    pub fn fail(&mut self, error: JobError) -> Applied {
        self.apply(StatusUpdate::Failed(error))
    }

    /// The artifact presented to the user: the first output.
    pub fn primary_output(&self) -> Option<&str> {
        self.outputs.first().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
